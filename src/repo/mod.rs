//! Extension repository index client
//!
//! Read-through cache over a remote JSON index describing installable
//! packages. The index is replaced wholesale on refresh; package downloads
//! resolve against the index URL's parent directory.

use crate::core::error::{BridgeError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;
use tracing::info;

/// One installable package as described by the remote index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoEntry {
    pub name: String,
    pub pkg: String,
    /// Package filename relative to the repository's `apk/` directory
    pub apk: String,
    pub lang: String,
    pub version: String,
    #[serde(default)]
    pub nsfw: Option<u8>,
    #[serde(default)]
    pub sources: Vec<RepoSource>,
}

impl RepoEntry {
    pub fn is_nsfw(&self) -> bool {
        self.nsfw.unwrap_or(0) == 1
    }
}

/// One catalog declared by a repository entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoSource {
    pub id: i64,
    pub name: String,
    pub lang: String,
    #[serde(rename = "baseUrl", default)]
    pub base_url: String,
    #[serde(default)]
    pub supports_latest: Option<bool>,
}

/// Boundary seam for the repository index
#[async_trait]
pub trait RepoIndex: Send + Sync {
    /// Fetch the index, serving from cache unless `force_refresh`
    async fn fetch_index(&self, force_refresh: bool) -> Result<Vec<RepoEntry>>;

    /// Look up one package in the index
    async fn find_by_package(&self, pkg: &str, force_refresh: bool) -> Result<Option<RepoEntry>> {
        Ok(self
            .fetch_index(force_refresh)
            .await?
            .into_iter()
            .find(|entry| entry.pkg == pkg))
    }

    /// Replace the index URL, invalidating the cache
    fn set_index_url(&self, url: &str) -> Result<()>;

    /// Download a package described by an index entry to `dest`
    async fn download_package(&self, entry: &RepoEntry, dest: &Path) -> Result<()>;
}

/// HTTP-backed implementation of [`RepoIndex`]
pub struct HttpRepoClient {
    client: reqwest::Client,
    index_url: RwLock<String>,
    cached: RwLock<Option<Vec<RepoEntry>>>,
}

impl HttpRepoClient {
    pub fn new(initial_index_url: String, fetch_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("yomu-bridge/", env!("CARGO_PKG_VERSION")))
            .timeout(fetch_timeout)
            .build()
            .map_err(|e| BridgeError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            index_url: RwLock::new(initial_index_url),
            cached: RwLock::new(None),
        })
    }

    fn current_url(&self) -> String {
        self.index_url.read().unwrap().clone()
    }

    /// Resolve the download URL for a package: `{index-parent}/apk/{apk}`
    fn package_url(index_url: &str, apk: &str) -> String {
        match url::Url::parse(index_url) {
            Ok(parsed) => parsed
                .join("./")
                .and_then(|parent| parent.join(&format!("apk/{}", apk)))
                .map(|u| u.to_string())
                .unwrap_or_else(|_| fallback_package_url(index_url, apk)),
            Err(_) => fallback_package_url(index_url, apk),
        }
    }
}

fn fallback_package_url(index_url: &str, apk: &str) -> String {
    let base = index_url.rsplit_once('/').map_or(index_url, |(head, _)| head);
    format!("{}/apk/{}", base, apk)
}

/// Reject URLs that cannot name a JSON index
fn validate_index_url(url: &str) -> Result<()> {
    if url.trim().is_empty() {
        return Err(BridgeError::Repo(
            "extensions index URL cannot be empty".into(),
        ));
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(BridgeError::Repo(
            "extensions index URL must start with http:// or https://".into(),
        ));
    }
    if !url.ends_with(".json") {
        return Err(BridgeError::Repo(
            "extensions index URL must point to a JSON file".into(),
        ));
    }
    Ok(())
}

#[async_trait]
impl RepoIndex for HttpRepoClient {
    async fn fetch_index(&self, force_refresh: bool) -> Result<Vec<RepoEntry>> {
        if !force_refresh {
            if let Some(cached) = self.cached.read().unwrap().clone() {
                return Ok(cached);
            }
        }

        let url = self.current_url();
        validate_index_url(&url)?;

        info!(url = %url, "Fetching extension index");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BridgeError::Network(format!("failed to fetch index: {}", e)))?;

        if !response.status().is_success() {
            return Err(BridgeError::Network(format!(
                "failed to fetch index: HTTP {}",
                response.status().as_u16()
            )));
        }

        let entries: Vec<RepoEntry> = response
            .json()
            .await
            .map_err(|e| BridgeError::Serialization(format!("invalid index document: {}", e)))?;

        info!(count = entries.len(), "Fetched extension index");
        *self.cached.write().unwrap() = Some(entries.clone());
        Ok(entries)
    }

    fn set_index_url(&self, url: &str) -> Result<()> {
        validate_index_url(url)?;
        *self.index_url.write().unwrap() = url.to_string();
        *self.cached.write().unwrap() = None;
        info!(url = %url, "Updated repository index URL");
        Ok(())
    }

    async fn download_package(&self, entry: &RepoEntry, dest: &Path) -> Result<()> {
        let url = Self::package_url(&self.current_url(), &entry.apk);
        info!(pkg = %entry.pkg, url = %url, "Downloading package");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BridgeError::Network(format!("download failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(BridgeError::Network(format!(
                "download failed: HTTP {}",
                response.status().as_u16()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| BridgeError::Network(format!("download failed: {}", e)))?;

        tokio::fs::write(dest, &bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_index_url() {
        assert!(validate_index_url("https://mirror.example/index.json").is_ok());
        assert!(validate_index_url("").is_err());
        assert!(validate_index_url("ftp://mirror.example/index.json").is_err());
        assert!(validate_index_url("https://mirror.example/index.html").is_err());
    }

    #[test]
    fn test_package_url_resolution() {
        assert_eq!(
            HttpRepoClient::package_url("https://mirror.example/repo/index.json", "foo-v1.4.apk"),
            "https://mirror.example/repo/apk/foo-v1.4.apk"
        );
    }

    #[test]
    fn test_package_url_fallback() {
        assert_eq!(
            fallback_package_url("https://mirror.example/repo/index.json", "foo.apk"),
            "https://mirror.example/repo/apk/foo.apk"
        );
    }

    #[test]
    fn test_index_entry_parsing() {
        let raw = r#"[{
            "name": "Example",
            "pkg": "com.example.foo",
            "apk": "foo-v1.4.0.pkg",
            "lang": "en",
            "version": "1.4.0",
            "nsfw": 0,
            "sources": [
                {"id": 7, "name": "Example", "lang": "en", "baseUrl": "https://example.org", "supports_latest": true}
            ]
        }]"#;

        let entries: Vec<RepoEntry> = serde_json::from_str(raw).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].is_nsfw());
        assert_eq!(entries[0].sources[0].id, 7);
        assert_eq!(entries[0].sources[0].base_url, "https://example.org");
    }

    #[test]
    fn test_set_index_url_invalidates_cache() {
        let client =
            HttpRepoClient::new("https://a.example/index.json".into(), Duration::from_secs(5))
                .unwrap();
        *client.cached.write().unwrap() = Some(vec![]);

        client.set_index_url("https://b.example/index.json").unwrap();
        assert!(client.cached.read().unwrap().is_none());
        assert_eq!(client.current_url(), "https://b.example/index.json");
    }
}
