//! Extension lifecycle request/response models

use crate::repo::RepoEntry;
use crate::store::{InstalledExtension, SolverConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct SetRepoUrlRequest {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct PackageRequest {
    pub pkg: String,
}

#[derive(Debug, Deserialize)]
pub struct SetProxyRequest {
    pub use_proxy: bool,
}

#[derive(Debug, Serialize)]
pub struct SourceInfoResponse {
    pub id: i64,
    pub name: String,
    pub lang: String,
    pub supports_latest: bool,
}

#[derive(Debug, Serialize)]
pub struct ExtensionInfoResponse {
    pub pkg: String,
    pub name: String,
    pub version: String,
    pub lang: String,
    pub nsfw: bool,
    pub use_proxy: bool,
    pub sources: Vec<SourceInfoResponse>,
}

impl From<InstalledExtension> for ExtensionInfoResponse {
    fn from(ext: InstalledExtension) -> Self {
        Self {
            pkg: ext.pkg,
            name: ext.name,
            version: ext.version,
            lang: ext.lang,
            nsfw: ext.nsfw,
            use_proxy: ext.use_proxy,
            sources: ext
                .sources
                .into_iter()
                .map(|source| SourceInfoResponse {
                    id: source.id,
                    name: source.name,
                    lang: source.lang,
                    supports_latest: source.supports_latest,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RepoExtensionResponse {
    pub pkg: String,
    pub name: String,
    pub version: String,
    pub lang: String,
    pub nsfw: bool,
    pub sources: Vec<SourceInfoResponse>,
}

impl From<RepoEntry> for RepoExtensionResponse {
    fn from(entry: RepoEntry) -> Self {
        let nsfw = entry.is_nsfw();
        Self {
            pkg: entry.pkg,
            name: entry.name,
            version: entry.version,
            lang: entry.lang,
            nsfw,
            sources: entry
                .sources
                .into_iter()
                .map(|source| SourceInfoResponse {
                    id: source.id,
                    name: source.name,
                    lang: source.lang,
                    supports_latest: source.supports_latest.unwrap_or(true),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub loaded_sources: usize,
    pub timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SolverConfigBody {
    pub enabled: bool,
    pub url: String,
    pub timeout_seconds: u32,
    pub response_fallback: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_ttl_minutes: Option<u32>,
}

impl From<SolverConfig> for SolverConfigBody {
    fn from(config: SolverConfig) -> Self {
        Self {
            enabled: config.enabled,
            url: config.url,
            timeout_seconds: config.timeout_seconds,
            response_fallback: config.response_fallback,
            session_name: config.session_name,
            session_ttl_minutes: config.session_ttl_minutes,
        }
    }
}

impl From<SolverConfigBody> for SolverConfig {
    fn from(body: SolverConfigBody) -> Self {
        Self {
            enabled: body.enabled,
            url: body.url,
            timeout_seconds: body.timeout_seconds,
            response_fallback: body.response_fallback,
            session_name: body.session_name,
            session_ttl_minutes: body.session_ttl_minutes,
        }
    }
}
