//! Extension manager
//!
//! Orchestrates the extension lifecycle (install, update, uninstall,
//! startup resync) and brokers every capability call against the correct
//! loaded instance. Lifecycle operations are mutually exclusive per package
//! identity but independent across packages; query dispatch never takes an
//! identity lock.

use crate::core::error::{BridgeError, Result};
use crate::extension::source::{
    Capability, CatalogSource, ChapterInfo, PageInfo, PreferenceField, Title, TitlesPage,
};
use crate::loader::{module_base_name, sanitize_component, ModuleLoader, MODULE_EXT};
use crate::repo::{RepoEntry, RepoIndex};
use crate::store::{ConfigStore, InstalledExtension, PreferenceValue, SourceRecord};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

/// One live instance in the capability map
struct SourceEntry {
    source: Arc<dyn CatalogSource>,
    pkg: String,
    /// Preference epoch last applied to this instance
    applied_epoch: AtomicU64,
}

pub struct ExtensionManager {
    extensions_dir: PathBuf,
    loader: Arc<dyn ModuleLoader>,
    repo: Arc<dyn RepoIndex>,
    store: Arc<ConfigStore>,
    /// Capability id -> live instance. The sole owner of loaded instances.
    sources: RwLock<HashMap<i64, Arc<SourceEntry>>>,
    /// Per-identity mutexes serializing install/update/uninstall
    identity_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Bumped on every preference write; instances lazily re-apply
    pref_epoch: AtomicU64,
}

impl ExtensionManager {
    pub fn new(
        extensions_dir: PathBuf,
        loader: Arc<dyn ModuleLoader>,
        repo: Arc<dyn RepoIndex>,
        store: Arc<ConfigStore>,
    ) -> Self {
        Self {
            extensions_dir,
            loader,
            repo,
            store,
            sources: RwLock::new(HashMap::new()),
            identity_locks: Mutex::new(HashMap::new()),
            pref_epoch: AtomicU64::new(1),
        }
    }

    /// Startup resync: drop records whose module archive is gone, then load
    /// every remaining record, tolerating individual failures. Returns the
    /// number of successfully instantiated sources.
    pub async fn init(&self) -> Result<usize> {
        info!("Initializing extension manager");
        tokio::fs::create_dir_all(&self.extensions_dir).await?;

        let mut module_files = HashSet::new();
        let mut read_dir = tokio::fs::read_dir(&self.extensions_dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(&format!(".{}", MODULE_EXT)) {
                module_files.insert(name);
            }
        }

        let snapshot = self.store.snapshot();
        let valid: HashSet<String> = snapshot
            .extensions
            .iter()
            .filter(|ext| module_files.contains(&ext.module_file()))
            .map(|ext| ext.pkg.clone())
            .collect();
        self.store.retain_extensions(&valid)?;

        let mut loaded_extensions = 0usize;
        let mut loaded_sources = 0usize;
        for ext in self.store.snapshot().extensions {
            match self.load_installed(&ext).await {
                Ok(count) => {
                    loaded_extensions += 1;
                    loaded_sources += count;
                }
                Err(e) => {
                    error!(pkg = %ext.pkg, error = %e, "Failed to load installed extension");
                }
            }
        }

        info!(
            extensions = loaded_extensions,
            sources = loaded_sources,
            "Extension manager initialized"
        );
        Ok(loaded_sources)
    }

    /// Load one persisted record's module and register its instances
    async fn load_installed(&self, ext: &InstalledExtension) -> Result<usize> {
        let module_path = self.extensions_dir.join(ext.module_file());
        let sources = self
            .loader
            .instantiate(
                &ext.pkg,
                ext.source_class.as_deref(),
                ext.factory_class.as_deref(),
                &module_path,
            )
            .await?;

        let count = sources.len();
        self.register_sources(&ext.pkg, sources).await;
        Ok(count)
    }

    /// Insert instances into the capability map and apply persisted
    /// preferences to them
    async fn register_sources(&self, pkg: &str, sources: Vec<Arc<dyn CatalogSource>>) {
        let mut registered = Vec::with_capacity(sources.len());
        {
            let mut map = self.sources.write().await;
            for source in sources {
                let id = source.descriptor().id;
                let entry = Arc::new(SourceEntry {
                    source,
                    pkg: pkg.to_string(),
                    applied_epoch: AtomicU64::new(0),
                });
                if map.insert(id, entry.clone()).is_some() {
                    warn!(source_id = id, pkg = %pkg, "Replacing existing instance for source id");
                }
                registered.push(entry);
            }
        }
        for entry in registered {
            self.ensure_prefs(&entry).await;
        }
    }

    async fn identity_lock(&self, pkg: &str) -> Arc<Mutex<()>> {
        self.identity_locks
            .lock()
            .await
            .entry(pkg.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // Lifecycle ----------------------------------------------------------

    pub async fn install(&self, pkg: &str) -> Result<InstalledExtension> {
        let lock = self.identity_lock(pkg).await;
        let _guard = lock.lock().await;
        self.install_locked(pkg, false).await
    }

    async fn install_locked(&self, pkg: &str, force_refresh: bool) -> Result<InstalledExtension> {
        info!(pkg = %pkg, "Installing extension");

        if self.store.find_extension(pkg).is_some() {
            return Err(BridgeError::AlreadyInstalled(pkg.to_string()));
        }
        if self.store.repo_url().trim().is_empty() {
            return Err(BridgeError::Repo("repository URL not configured".into()));
        }

        let entry = self
            .repo
            .find_by_package(pkg, force_refresh)
            .await?
            .ok_or_else(|| {
                BridgeError::NotFound(format!("extension not found in repository: {}", pkg))
            })?;

        tokio::fs::create_dir_all(&self.extensions_dir).await?;
        let package_path = self.extensions_dir.join(&entry.apk);
        let tmp_path = self
            .extensions_dir
            .join(format!(".{}.download", Uuid::new_v4()));

        let loaded = async {
            self.repo.download_package(&entry, &tmp_path).await?;
            tokio::fs::rename(&tmp_path, &package_path).await?;
            self.loader.load(&package_path).await
        }
        .await;

        // The package artifact is consumed exactly once; drop it (and the
        // temp download) whether or not the pipeline succeeded
        let _ = tokio::fs::remove_file(&tmp_path).await;
        let _ = tokio::fs::remove_file(&package_path).await;

        let loaded = loaded?;

        self.purge_superseded_modules(pkg, &loaded.module_path).await;

        let record = Self::build_record(pkg, &entry, &loaded);
        if let Err(e) = self.store.upsert_extension(record.clone()) {
            // Record never landed: roll the module artifacts back too
            self.loader.unload(&loaded.module_path).await;
            let _ = tokio::fs::remove_file(&loaded.module_path).await;
            return Err(e);
        }

        self.register_sources(pkg, loaded.sources).await;

        info!(pkg = %pkg, version = %record.version, "Installed extension");
        Ok(record)
    }

    fn build_record(
        pkg: &str,
        entry: &RepoEntry,
        loaded: &crate::loader::LoadedExtension,
    ) -> InstalledExtension {
        let module_name = loaded
            .module_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string());

        let sources = loaded
            .sources
            .iter()
            .map(|source| {
                let descriptor = source.descriptor();
                // The repo's supports_latest wins over the instance's claim
                let supports_latest = entry
                    .sources
                    .iter()
                    .find(|repo_source| repo_source.id == descriptor.id)
                    .and_then(|repo_source| repo_source.supports_latest)
                    .unwrap_or(descriptor.supports_latest);

                SourceRecord {
                    id: descriptor.id,
                    name: descriptor.name.clone(),
                    lang: if descriptor.lang.is_empty() {
                        entry.lang.clone()
                    } else {
                        descriptor.lang.clone()
                    },
                    supports_latest,
                }
            })
            .collect();

        InstalledExtension {
            pkg: pkg.to_string(),
            name: entry.name.clone(),
            version: entry.version.clone(),
            lang: entry.lang.clone(),
            nsfw: entry.is_nsfw(),
            module_name,
            source_class: loaded.metadata.source_class.clone(),
            factory_class: loaded.metadata.factory_class.clone(),
            use_proxy: false,
            sources,
        }
    }

    /// Delete module archives for the same identity with a different
    /// filename than the current one
    async fn purge_superseded_modules(&self, pkg: &str, current: &Path) {
        let current_name = current
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        // "{pkg}-v" is the shared identity prefix of every version's archive
        let prefix = format!("{}-v", sanitize_component(pkg));

        let mut read_dir = match tokio::fs::read_dir(&self.extensions_dir).await {
            Ok(read_dir) => read_dir,
            Err(_) => return,
        };
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(&prefix)
                && name.ends_with(&format!(".{}", MODULE_EXT))
                && name != current_name
            {
                if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                    warn!(file = %name, error = %e, "Failed to delete superseded module");
                } else {
                    info!(file = %name, "Deleted superseded module archive");
                }
            }
        }
    }

    pub async fn uninstall(&self, pkg: &str) -> Result<()> {
        let lock = self.identity_lock(pkg).await;
        let _guard = lock.lock().await;
        self.uninstall_locked(pkg).await
    }

    async fn uninstall_locked(&self, pkg: &str) -> Result<()> {
        info!(pkg = %pkg, "Uninstalling extension");

        let record = self
            .store
            .find_extension(pkg)
            .ok_or_else(|| BridgeError::NotFound(format!("not installed: {}", pkg)))?;

        {
            let mut sources = self.sources.write().await;
            for source in &record.sources {
                sources.remove(&source.id);
            }
        }

        let module_path = self.extensions_dir.join(record.module_file());
        self.loader.unload(&module_path).await;
        match tokio::fs::remove_file(&module_path).await {
            Ok(()) => {}
            // Idempotent against an archive that is already gone
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        self.store.remove_extension(pkg)?;
        info!(pkg = %pkg, "Uninstalled extension");
        Ok(())
    }

    /// Update to the repository's version.
    ///
    /// Implemented as uninstall-then-install. Known limitation, kept from
    /// the original contract: the old installation is removed before the
    /// new one is confirmed, so a failed install leaves the package
    /// uninstalled rather than rolled back.
    pub async fn update(&self, pkg: &str) -> Result<InstalledExtension> {
        let lock = self.identity_lock(pkg).await;
        let _guard = lock.lock().await;

        info!(pkg = %pkg, "Updating extension");

        let installed = self
            .store
            .find_extension(pkg)
            .ok_or_else(|| BridgeError::NotFound(format!("not installed: {}", pkg)))?;

        let repo_entry = self
            .repo
            .find_by_package(pkg, true)
            .await?
            .ok_or_else(|| {
                BridgeError::NotFound(format!("extension not found in repository: {}", pkg))
            })?;

        if repo_entry.version == installed.version {
            return Err(BridgeError::AlreadyUpToDate(pkg.to_string()));
        }

        self.uninstall_locked(pkg).await?;
        self.install_locked(pkg, false).await
    }

    /// Unload everything; used at shutdown
    pub async fn cleanup(&self) {
        info!("Cleaning up extension manager");
        for ext in self.store.snapshot().extensions {
            let module_path = self.extensions_dir.join(ext.module_file());
            self.loader.unload(&module_path).await;
        }
        self.sources.write().await.clear();
    }

    // Listing ------------------------------------------------------------

    pub fn list_extensions(&self) -> Vec<InstalledExtension> {
        self.store.snapshot().extensions
    }

    pub async fn list_repo_extensions(&self) -> Result<Vec<RepoEntry>> {
        self.repo.fetch_index(false).await
    }

    /// Sources with a live instance, described by their persisted records
    pub async fn list_sources(&self) -> Vec<SourceRecord> {
        let snapshot = self.store.snapshot();
        let sources = self.sources.read().await;

        let mut records: Vec<SourceRecord> = sources
            .iter()
            .filter_map(|(id, entry)| {
                let ext = snapshot.find_extension(&entry.pkg)?;
                ext.sources.iter().find(|record| record.id == *id).cloned()
            })
            .collect();
        records.sort_by_key(|record| record.id);
        records
    }

    pub async fn loaded_source_count(&self) -> usize {
        self.sources.read().await.len()
    }

    pub fn set_repo_url(&self, url: &str) -> Result<()> {
        self.repo.set_index_url(url)?;
        self.store.set_repo_url(url)
    }

    pub fn set_use_proxy(&self, pkg: &str, use_proxy: bool) -> Result<()> {
        if self.store.find_extension(pkg).is_none() {
            return Err(BridgeError::NotFound(format!("not installed: {}", pkg)));
        }
        self.store.set_use_proxy(pkg, use_proxy)
    }

    // Query dispatch -----------------------------------------------------

    async fn entry_for(&self, source_id: i64, capability: Capability) -> Result<Arc<SourceEntry>> {
        let entry = self
            .sources
            .read()
            .await
            .get(&source_id)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(format!("source {} not found", source_id)))?;

        if !entry.source.supports(capability) {
            return Err(BridgeError::NotFound(format!(
                "source {} does not support {}",
                source_id, capability
            )));
        }

        self.ensure_prefs(&entry).await;
        Ok(entry)
    }

    /// Re-apply persisted preferences when the instance is behind the
    /// current preference epoch. Applying the same value twice is a no-op
    /// by contract, so coarse staleness is fine.
    async fn ensure_prefs(&self, entry: &SourceEntry) {
        let epoch = self.pref_epoch.load(Ordering::Acquire);
        if entry.applied_epoch.load(Ordering::Acquire) >= epoch {
            return;
        }

        if entry.source.supports(Capability::Configure) {
            let prefs = self.store.prefs_for(entry.source.descriptor().id);
            for (key, value) in prefs {
                if let Err(e) = entry.source.set_preference(&key, &value).await {
                    warn!(
                        source_id = entry.source.descriptor().id,
                        key = %key,
                        error = %e,
                        "Failed to apply persisted preference"
                    );
                }
            }
        }
        entry.applied_epoch.store(epoch, Ordering::Release);
    }

    pub async fn search(&self, source_id: i64, query: &str, page: u32) -> Result<TitlesPage> {
        let entry = self.entry_for(source_id, Capability::Search).await?;
        entry.source.search(query, page).await
    }

    pub async fn popular(&self, source_id: i64, page: u32) -> Result<TitlesPage> {
        let entry = self.entry_for(source_id, Capability::List).await?;
        entry.source.popular(page).await
    }

    pub async fn latest(&self, source_id: i64, page: u32) -> Result<TitlesPage> {
        let entry = self.entry_for(source_id, Capability::List).await?;
        if !entry.source.descriptor().supports_latest {
            return Err(BridgeError::NotFound(format!(
                "source {} does not support latest",
                source_id
            )));
        }
        entry.source.latest(page).await
    }

    pub async fn details(&self, source_id: i64, title_url: &str) -> Result<Title> {
        let entry = self.entry_for(source_id, Capability::Detail).await?;
        entry.source.details(title_url).await
    }

    /// Chapters, oldest first
    pub async fn chapters(&self, source_id: i64, title_url: &str) -> Result<Vec<ChapterInfo>> {
        let entry = self.entry_for(source_id, Capability::Detail).await?;
        let mut chapters = entry.source.chapters(title_url).await?;
        chapters.reverse();
        Ok(chapters)
    }

    pub async fn pages(&self, source_id: i64, chapter_url: &str) -> Result<Vec<PageInfo>> {
        let entry = self.entry_for(source_id, Capability::Detail).await?;
        entry.source.pages(chapter_url).await
    }

    pub async fn preference_schema(&self, source_id: i64) -> Result<Vec<PreferenceField>> {
        let entry = self.entry_for(source_id, Capability::Configure).await?;
        entry.source.preference_schema().await
    }

    /// Decode, persist and immediately apply one preference value
    pub async fn set_preference(&self, source_id: i64, key: &str, raw_value: &str) -> Result<()> {
        let entry = self.entry_for(source_id, Capability::Configure).await?;

        let value = PreferenceValue::decode(raw_value);
        self.store.set_source_preference(source_id, key, value.clone())?;
        let epoch = self.pref_epoch.fetch_add(1, Ordering::AcqRel) + 1;

        entry.source.set_preference(key, &value).await?;
        entry.applied_epoch.store(epoch, Ordering::Release);

        info!(source_id, key = %key, "Preference set");
        Ok(())
    }
}
