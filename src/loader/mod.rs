//! Extension loading pipeline
//!
//! Ties the pipeline stages together: inspect the package, convert and
//! patch its payload into a module archive, open a loading namespace and
//! resolve the declared entry points into live [`CatalogSource`] instances.
//! The [`ModuleLoader`] trait is the seam the Extension Manager depends on.

pub mod convert;
pub mod package;
pub mod patch;
pub mod registry;
pub mod shims;
pub mod wasmbin;

pub use convert::{module_base_name, sanitize_component, MODULE_EXT};
pub use package::PackageMetadata;
pub use patch::RewriteTable;
pub use registry::ModuleRegistry;

use crate::core::error::{BridgeError, Result};
use crate::extension::source::{
    Capability, CatalogSource, ChapterInfo, PageInfo, PreferenceField, SourceDescriptor, Title,
    TitlesPage,
};
use crate::store::PreferenceValue;
use async_trait::async_trait;
use registry::ModuleHost;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Result of running a package through the full pipeline
pub struct LoadedExtension {
    pub metadata: PackageMetadata,
    pub sources: Vec<Arc<dyn CatalogSource>>,
    pub module_path: PathBuf,
}

/// The loading seam between the Extension Manager and the module pipeline
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    /// Full install pipeline for a downloaded package: validate, convert,
    /// patch, load and instantiate. On failure no module archive is left
    /// behind.
    async fn load(&self, package_path: &Path) -> Result<LoadedExtension>;

    /// Instantiate the entry points of an already-converted module
    async fn instantiate(
        &self,
        pkg: &str,
        source_class: Option<&str>,
        factory_class: Option<&str>,
        module_path: &Path,
    ) -> Result<Vec<Arc<dyn CatalogSource>>>;

    /// Release the loading namespace for a module archive
    async fn unload(&self, module_path: &Path);
}

/// Production loader backed by the wasm module registry
pub struct WasmExtensionLoader {
    extensions_dir: PathBuf,
    registry: Arc<ModuleRegistry>,
    rewrites: RewriteTable,
}

impl WasmExtensionLoader {
    pub fn new(extensions_dir: PathBuf, registry: Arc<ModuleRegistry>) -> Self {
        Self {
            extensions_dir,
            registry,
            rewrites: RewriteTable::platform_defaults(),
        }
    }

    pub fn with_rewrites(mut self, rewrites: RewriteTable) -> Self {
        self.rewrites = rewrites;
        self
    }

    fn wrap_sources(
        descriptors: Vec<(SourceDescriptor, Arc<ModuleHost>)>,
    ) -> Vec<Arc<dyn CatalogSource>> {
        descriptors
            .into_iter()
            .map(|(descriptor, host)| {
                Arc::new(WasmSource { descriptor, host }) as Arc<dyn CatalogSource>
            })
            .collect()
    }
}

#[async_trait]
impl ModuleLoader for WasmExtensionLoader {
    async fn load(&self, package_path: &Path) -> Result<LoadedExtension> {
        let metadata = package::inspect(package_path)?;
        let module_path = convert::convert_package(
            package_path,
            &metadata,
            &self.extensions_dir,
            &self.rewrites,
        )?;

        let instantiated = self
            .registry
            .instantiate(
                &metadata.pkg,
                metadata.source_class.as_deref(),
                metadata.factory_class.as_deref(),
                &module_path,
            )
            .await;

        let descriptors = match instantiated {
            Ok(descriptors) => descriptors,
            Err(e) => {
                // Nothing usable was produced: drop the archive again
                self.registry.unload(&module_path).await;
                let _ = std::fs::remove_file(&module_path);
                return Err(e);
            }
        };

        info!(
            pkg = %metadata.pkg,
            version = %metadata.version,
            sources = descriptors.len(),
            "Loaded extension package"
        );

        Ok(LoadedExtension {
            sources: Self::wrap_sources(descriptors),
            metadata,
            module_path,
        })
    }

    async fn instantiate(
        &self,
        pkg: &str,
        source_class: Option<&str>,
        factory_class: Option<&str>,
        module_path: &Path,
    ) -> Result<Vec<Arc<dyn CatalogSource>>> {
        let descriptors = self
            .registry
            .instantiate(pkg, source_class, factory_class, module_path)
            .await?;
        Ok(Self::wrap_sources(descriptors))
    }

    async fn unload(&self, module_path: &Path) {
        self.registry.unload(module_path).await;
    }
}

/// A catalog source backed by a loaded wasm module.
///
/// Every call goes through the module's `invoke` dispatch export with the
/// source id in the parameters, so one module can serve several catalogs.
struct WasmSource {
    descriptor: SourceDescriptor,
    host: Arc<ModuleHost>,
}

impl WasmSource {
    fn from_value<T: serde::de::DeserializeOwned>(
        method: &str,
        value: serde_json::Value,
    ) -> Result<T> {
        serde_json::from_value(value).map_err(|e| {
            BridgeError::SourceCall(format!("{} returned unexpected shape: {}", method, e))
        })
    }
}

#[async_trait]
impl CatalogSource for WasmSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn search(&self, query: &str, page: u32) -> Result<TitlesPage> {
        let params = serde_json::json!({
            "source_id": self.descriptor.id,
            "query": query,
            "page": page,
        });
        let value = self.host.invoke("search", &params).await?;
        Self::from_value("search", value)
    }

    async fn popular(&self, page: u32) -> Result<TitlesPage> {
        let params = serde_json::json!({ "source_id": self.descriptor.id, "page": page });
        let value = self.host.invoke("popular", &params).await?;
        Self::from_value("popular", value)
    }

    async fn latest(&self, page: u32) -> Result<TitlesPage> {
        let params = serde_json::json!({ "source_id": self.descriptor.id, "page": page });
        let value = self.host.invoke("latest", &params).await?;
        Self::from_value("latest", value)
    }

    async fn details(&self, title_url: &str) -> Result<Title> {
        let params =
            serde_json::json!({ "source_id": self.descriptor.id, "title_url": title_url });
        let value = self.host.invoke("details", &params).await?;
        Self::from_value("details", value)
    }

    async fn chapters(&self, title_url: &str) -> Result<Vec<ChapterInfo>> {
        let params =
            serde_json::json!({ "source_id": self.descriptor.id, "title_url": title_url });
        let value = self.host.invoke("chapters", &params).await?;
        match value.get("chapters") {
            Some(chapters) => Self::from_value("chapters", chapters.clone()),
            None => Self::from_value("chapters", value),
        }
    }

    async fn pages(&self, chapter_url: &str) -> Result<Vec<PageInfo>> {
        let params =
            serde_json::json!({ "source_id": self.descriptor.id, "chapter_url": chapter_url });
        let value = self.host.invoke("pages", &params).await?;
        match value.get("pages") {
            Some(pages) => Self::from_value("pages", pages.clone()),
            None => Self::from_value("pages", value),
        }
    }

    async fn preference_schema(&self) -> Result<Vec<PreferenceField>> {
        if !self.supports(Capability::Configure) {
            return Ok(Vec::new());
        }
        let params = serde_json::json!({ "source_id": self.descriptor.id });
        let value = self.host.invoke("preference_schema", &params).await?;
        match value.get("preferences") {
            Some(preferences) => Self::from_value("preference_schema", preferences.clone()),
            None => Self::from_value("preference_schema", value),
        }
    }

    async fn set_preference(&self, key: &str, value: &PreferenceValue) -> Result<()> {
        let params = serde_json::json!({
            "source_id": self.descriptor.id,
            "key": key,
            "value": value.to_json(),
        });
        self.host.invoke("set_preference", &params).await?;
        Ok(())
    }
}
