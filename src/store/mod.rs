//! Durable configuration store
//!
//! A single JSON document (`bridge.json` under the data directory) holds
//! everything that must survive restarts: the repository URL, the installed
//! extension records, per-source preferences and the anti-bot solver block.
//! One read/write lock guards the whole record set (read-mostly); every
//! mutation rewrites the file via write-to-temp-then-atomic-rename so a
//! concurrent reader never observes a half-written document.

pub mod preference;

pub use preference::PreferenceValue;

use crate::core::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::{debug, error, info};

/// Persisted record of one installed extension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledExtension {
    pub pkg: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub lang: String,
    #[serde(default)]
    pub nsfw: bool,
    /// Filename of the converted module archive inside the extensions dir
    #[serde(default)]
    pub module_name: Option<String>,
    #[serde(default)]
    pub source_class: Option<String>,
    #[serde(default)]
    pub factory_class: Option<String>,
    #[serde(default)]
    pub use_proxy: bool,
    #[serde(default)]
    pub sources: Vec<SourceRecord>,
}

impl InstalledExtension {
    /// The module archive filename, falling back to the deterministic name
    pub fn module_file(&self) -> String {
        self.module_name
            .clone()
            .unwrap_or_else(|| format!("{}-v{}.mod", self.pkg, self.version))
    }
}

/// One catalog exposed by an installed extension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: i64,
    pub name: String,
    pub lang: String,
    #[serde(default = "default_true")]
    pub supports_latest: bool,
}

fn default_true() -> bool {
    true
}

/// Anti-bot challenge solver configuration (boundary component)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_solver_url")]
    pub url: String,
    #[serde(default = "default_solver_timeout")]
    pub timeout_seconds: u32,
    #[serde(default = "default_true")]
    pub response_fallback: bool,
    #[serde(default)]
    pub session_name: Option<String>,
    #[serde(default)]
    pub session_ttl_minutes: Option<u32>,
}

fn default_solver_url() -> String {
    "http://localhost:8191".to_string()
}

fn default_solver_timeout() -> u32 {
    45
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_solver_url(),
            timeout_seconds: default_solver_timeout(),
            response_fallback: true,
            session_name: None,
            session_ttl_minutes: None,
        }
    }
}

/// The whole persisted document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeState {
    #[serde(default)]
    pub repo_url: String,
    #[serde(default)]
    pub extensions: Vec<InstalledExtension>,
    /// source-id (stringified) -> preference key -> value
    #[serde(default)]
    pub source_prefs: HashMap<String, HashMap<String, PreferenceValue>>,
    #[serde(default)]
    pub solver: SolverConfig,
}

impl BridgeState {
    pub fn find_extension(&self, pkg: &str) -> Option<&InstalledExtension> {
        self.extensions.iter().find(|ext| ext.pkg == pkg)
    }

    pub fn prefs_for(&self, source_id: i64) -> HashMap<String, PreferenceValue> {
        self.source_prefs
            .get(&source_id.to_string())
            .cloned()
            .unwrap_or_default()
    }
}

/// Thread-safe store over the persisted document
pub struct ConfigStore {
    path: PathBuf,
    state: RwLock<BridgeState>,
}

impl ConfigStore {
    /// Open (or create) the store under the given data directory
    pub fn open(data_dir: &std::path::Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join("bridge.json");

        let state = if path.exists() {
            match Self::read_state(&path) {
                Ok(state) => {
                    info!(path = %path.display(), "Loaded bridge config");
                    state
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to parse bridge config, using defaults");
                    BridgeState::default()
                }
            }
        } else {
            let state = BridgeState::default();
            Self::write_state(&path, &state)?;
            info!(path = %path.display(), "Created default bridge config");
            state
        };

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    fn read_state(path: &std::path::Path) -> Result<BridgeState> {
        let raw = std::fs::read_to_string(path)?;
        if raw.trim().is_empty() {
            return Ok(BridgeState::default());
        }
        serde_json::from_str(&raw).map_err(|e| BridgeError::Serialization(e.to_string()))
    }

    fn write_state(path: &std::path::Path, state: &BridgeState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| BridgeError::Serialization(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Clone of the current document
    pub fn snapshot(&self) -> BridgeState {
        self.state.read().unwrap().clone()
    }

    /// Apply a mutation and persist it if anything changed
    pub fn update<F>(&self, updater: F) -> Result<()>
    where
        F: FnOnce(&mut BridgeState),
    {
        let mut guard = self.state.write().unwrap();
        let old = guard.clone();
        updater(&mut guard);

        if *guard != old {
            Self::write_state(&self.path, &guard)?;
            debug!("Bridge config updated");
        }
        Ok(())
    }

    // Quick accessors

    pub fn repo_url(&self) -> String {
        self.state.read().unwrap().repo_url.clone()
    }

    pub fn set_repo_url(&self, url: &str) -> Result<()> {
        self.update(|state| state.repo_url = url.to_string())
    }

    pub fn find_extension(&self, pkg: &str) -> Option<InstalledExtension> {
        self.state.read().unwrap().find_extension(pkg).cloned()
    }

    /// Insert or replace the record for a package
    pub fn upsert_extension(&self, extension: InstalledExtension) -> Result<()> {
        self.update(|state| {
            if let Some(existing) = state
                .extensions
                .iter_mut()
                .find(|ext| ext.pkg == extension.pkg)
            {
                *existing = extension;
            } else {
                state.extensions.push(extension);
            }
        })
    }

    pub fn remove_extension(&self, pkg: &str) -> Result<()> {
        self.update(|state| state.extensions.retain(|ext| ext.pkg != pkg))
    }

    pub fn set_use_proxy(&self, pkg: &str, use_proxy: bool) -> Result<()> {
        self.update(|state| {
            if let Some(ext) = state.extensions.iter_mut().find(|ext| ext.pkg == pkg) {
                ext.use_proxy = use_proxy;
            }
        })
    }

    /// Drop records for packages outside the given set; returns removed count
    pub fn retain_extensions(&self, valid: &std::collections::HashSet<String>) -> Result<usize> {
        let mut removed = 0;
        self.update(|state| {
            let before = state.extensions.len();
            state.extensions.retain(|ext| valid.contains(&ext.pkg));
            removed = before - state.extensions.len();
        })?;
        if removed > 0 {
            info!(removed, "Synced extension records against disk");
        }
        Ok(removed)
    }

    pub fn set_source_preference(
        &self,
        source_id: i64,
        key: &str,
        value: PreferenceValue,
    ) -> Result<()> {
        self.update(|state| {
            state
                .source_prefs
                .entry(source_id.to_string())
                .or_default()
                .insert(key.to_string(), value);
        })
    }

    pub fn prefs_for(&self, source_id: i64) -> HashMap<String, PreferenceValue> {
        self.state.read().unwrap().prefs_for(source_id)
    }

    pub fn solver_config(&self) -> SolverConfig {
        self.state.read().unwrap().solver.clone()
    }

    pub fn set_solver_config(&self, solver: SolverConfig) -> Result<()> {
        self.update(|state| state.solver = solver)
    }
}
