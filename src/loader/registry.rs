//! Module registry
//!
//! Holds at most one loading namespace per open module archive path. A
//! namespace owns the compiled module and its instantiated store; dropping
//! it releases every resource reachable only through it. `load` on a path
//! that is already open closes the old namespace first, so a reload always
//! picks up on-disk changes; `unload` followed by `instantiate` re-resolves
//! from a fresh namespace. Each namespace carries a generation number from a
//! global counter, so two live namespaces can never alias the same path.

use crate::core::error::{BridgeError, Result};
use crate::extension::source::SourceDescriptor;
use crate::loader::shims;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use wasmtime::*;
use wasmtime_wasi::preview2::preview1::{WasiPreview1Adapter, WasiPreview1View};
use wasmtime_wasi::preview2::{ResourceTable, WasiCtx, WasiView};

/// Upper bound for one delegated plugin call; plugin code may block on its
/// own outbound network requests
const CALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Default memory cap per loaded module
const DEFAULT_MEMORY_LIMIT: usize = 256 * 1024 * 1024;

/// Registry of open loading namespaces, keyed by archive path
pub struct ModuleRegistry {
    engine: Engine,
    namespaces: RwLock<HashMap<PathBuf, Arc<ModuleNamespace>>>,
    next_generation: AtomicU64,
}

impl ModuleRegistry {
    pub fn new() -> Result<Self> {
        let mut config = Config::new();
        config.wasm_backtrace_details(WasmBacktraceDetails::Enable);
        config.wasm_multi_memory(true);
        config.async_support(true);

        let engine = Engine::new(&config)
            .map_err(|e| BridgeError::Internal(format!("failed to create engine: {}", e)))?;

        Ok(Self {
            engine,
            namespaces: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        })
    }

    /// Open a fresh namespace for an archive path, closing any existing one
    pub async fn load(&self, path: &Path) -> Result<Arc<ModuleNamespace>> {
        let mut namespaces = self.namespaces.write().await;

        if let Some(old) = namespaces.remove(path) {
            debug!(
                path = %path.display(),
                generation = old.generation,
                "Closing stale namespace before reload"
            );
        }

        let namespace = Arc::new(self.open_namespace(path).await?);
        namespaces.insert(path.to_path_buf(), namespace.clone());

        info!(
            path = %path.display(),
            generation = namespace.generation,
            "Opened module namespace"
        );
        Ok(namespace)
    }

    /// Resolve the declared entry point(s) and collect the source
    /// descriptors they yield. Reloads the namespace if the path is not
    /// currently open.
    pub async fn instantiate(
        &self,
        pkg: &str,
        source_class: Option<&str>,
        factory_class: Option<&str>,
        path: &Path,
    ) -> Result<Vec<(SourceDescriptor, Arc<ModuleHost>)>> {
        let namespace = match self.get(path).await {
            Some(namespace) => namespace,
            None => self.load(path).await?,
        };
        let host = namespace.host.clone();

        let descriptors = if let Some(factory) = factory_class {
            let value = host.call_entry(factory).await?;
            let list = descriptors_from(value)?;
            if list.is_empty() {
                return Err(BridgeError::InvalidExtension(format!(
                    "factory {} returned no sources",
                    factory
                )));
            }
            list
        } else if let Some(class) = source_class {
            let value = host.call_entry(class).await?;
            let list = descriptors_from(value)?;
            if list.is_empty() {
                return Err(BridgeError::InvalidExtension(format!(
                    "entry point {} yielded no capability-bearing instance",
                    class
                )));
            }
            list
        } else {
            return Err(BridgeError::InvalidExtension(format!(
                "extension {} is missing entry point metadata",
                pkg
            )));
        };

        info!(
            pkg = %pkg,
            sources = descriptors.len(),
            "Instantiated extension entry point(s)"
        );
        Ok(descriptors
            .into_iter()
            .map(|descriptor| (descriptor, host.clone()))
            .collect())
    }

    /// Release the namespace for a path. Safe to call for paths that are
    /// not open.
    pub async fn unload(&self, path: &Path) -> bool {
        let removed = self.namespaces.write().await.remove(path);
        if let Some(namespace) = &removed {
            info!(
                path = %path.display(),
                generation = namespace.generation,
                "Released module namespace"
            );
        }
        removed.is_some()
    }

    pub async fn get(&self, path: &Path) -> Option<Arc<ModuleNamespace>> {
        self.namespaces.read().await.get(path).cloned()
    }

    pub async fn open_count(&self) -> usize {
        self.namespaces.read().await.len()
    }

    async fn open_namespace(&self, path: &Path) -> Result<ModuleNamespace> {
        let module_bytes = read_module_bytes(path)?;
        let module = Module::from_binary(&self.engine, &module_bytes)
            .map_err(|e| BridgeError::Conversion(format!("module rejected by engine: {}", e)))?;

        let state = HostState::new(DEFAULT_MEMORY_LIMIT);
        let mut store = Store::new(&self.engine, state);
        store.limiter(|state| &mut state.limiter);

        let mut linker: Linker<HostState> = Linker::new(&self.engine);
        wasmtime_wasi::preview2::preview1::add_to_linker_sync(&mut linker)
            .map_err(|e| BridgeError::Internal(format!("failed to add WASI to linker: {}", e)))?;
        shims::register_host_functions(&mut linker)?;
        linker
            .define_unknown_imports_as_traps(&module)
            .map_err(|e| BridgeError::Internal(format!("failed to stub imports: {}", e)))?;

        let instance = linker
            .instantiate_async(&mut store, &module)
            .await
            .map_err(|e| BridgeError::InvalidExtension(format!("instantiation failed: {}", e)))?;

        Ok(ModuleNamespace {
            path: path.to_path_buf(),
            generation: self.next_generation.fetch_add(1, Ordering::SeqCst),
            host: Arc::new(ModuleHost {
                inner: Mutex::new(HostInner { store, instance }),
            }),
        })
    }
}

/// Pull `module.wasm` out of a module archive
fn read_module_bytes(path: &Path) -> Result<Vec<u8>> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| BridgeError::Conversion(format!("not a module archive: {}", e)))?;
    let mut entry = archive
        .by_name("module.wasm")
        .map_err(|_| BridgeError::Conversion("module archive has no module.wasm".into()))?;
    let mut bytes = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut bytes)?;
    Ok(bytes)
}

fn descriptors_from(value: serde_json::Value) -> Result<Vec<SourceDescriptor>> {
    let parsed = match value {
        serde_json::Value::Array(_) => serde_json::from_value(value),
        serde_json::Value::Object(_) => {
            serde_json::from_value::<SourceDescriptor>(value).map(|d| vec![d])
        }
        other => {
            return Err(BridgeError::InvalidExtension(format!(
                "entry point returned unexpected value: {}",
                other
            )))
        }
    };
    parsed.map_err(|e| BridgeError::InvalidExtension(format!("bad source descriptor: {}", e)))
}

/// One isolated loading namespace
pub struct ModuleNamespace {
    pub path: PathBuf,
    pub generation: u64,
    pub host: Arc<ModuleHost>,
}

/// Execution handle shared by every source instantiated from one namespace.
/// The store is behind an async mutex: calls into one module serialize,
/// calls into different modules do not.
pub struct ModuleHost {
    inner: Mutex<HostInner>,
}

struct HostInner {
    store: Store<HostState>,
    instance: Instance,
}

impl ModuleHost {
    /// Call a declared entry point: an exported `() -> ptr` function
    /// returning a JSON source descriptor (or array of them)
    pub async fn call_entry(&self, export: &str) -> Result<serde_json::Value> {
        let mut inner = self.inner.lock().await;
        let instance = inner.instance;
        let func = instance
            .get_typed_func::<(), i32>(&mut inner.store, export)
            .map_err(|e| {
                BridgeError::InvalidExtension(format!("entry point {} not found: {}", export, e))
            })?;

        let result_ptr = tokio::time::timeout(CALL_TIMEOUT, func.call_async(&mut inner.store, ()))
            .await
            .map_err(|_| BridgeError::SourceCall(format!("entry point {} timed out", export)))?
            .map_err(|e| {
                BridgeError::InvalidExtension(format!("entry point {} failed: {}", export, e))
            })?;

        let raw = inner.read_cstring(result_ptr)?;
        serde_json::from_str(&raw)
            .map_err(|e| BridgeError::InvalidExtension(format!("bad entry point result: {}", e)))
    }

    /// Invoke the module's JSON dispatch export:
    /// `invoke(method_ptr, params_ptr) -> result_ptr`
    pub async fn invoke(
        &self,
        method: &str,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let mut inner = self.inner.lock().await;

        let method_ptr = inner.write_string(method).await?;
        let params_ptr = inner.write_string(&params.to_string()).await?;

        let instance = inner.instance;
        let func = instance
            .get_typed_func::<(i32, i32), i32>(&mut inner.store, "invoke")
            .map_err(|e| BridgeError::SourceCall(format!("invoke export missing: {}", e)))?;

        let result_ptr = tokio::time::timeout(
            CALL_TIMEOUT,
            func.call_async(&mut inner.store, (method_ptr, params_ptr)),
        )
        .await
        .map_err(|_| BridgeError::SourceCall(format!("{} timed out", method)))?
        .map_err(|e| BridgeError::SourceCall(format!("{} failed: {}", method, e)))?;

        let raw = inner.read_cstring(result_ptr)?;
        let value: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| BridgeError::SourceCall(format!("{} returned bad JSON: {}", method, e)))?;

        if let Some(message) = value.get("error").and_then(|v| v.as_str()) {
            return Err(BridgeError::SourceCall(format!(
                "{}: {}",
                method, message
            )));
        }
        Ok(value)
    }
}

impl HostInner {
    fn memory(&mut self) -> Result<Memory> {
        self.instance
            .get_memory(&mut self.store, "memory")
            .ok_or_else(|| BridgeError::SourceCall("module exports no memory".into()))
    }

    async fn alloc(&mut self, len: usize) -> Result<i32> {
        let func = self
            .instance
            .get_typed_func::<i32, i32>(&mut self.store, "alloc")
            .map_err(|e| BridgeError::SourceCall(format!("alloc export missing: {}", e)))?;
        func.call_async(&mut self.store, len as i32)
            .await
            .map_err(|e| BridgeError::SourceCall(format!("alloc failed: {}", e)))
    }

    /// Write a NUL-terminated string into module memory, returning its ptr
    async fn write_string(&mut self, value: &str) -> Result<i32> {
        let bytes = value.as_bytes();
        let ptr = self.alloc(bytes.len() + 1).await?;

        let memory = self.memory()?;
        memory
            .write(&mut self.store, ptr as usize, bytes)
            .and_then(|_| memory.write(&mut self.store, ptr as usize + bytes.len(), &[0]))
            .map_err(|e| BridgeError::SourceCall(format!("memory write failed: {}", e)))?;
        Ok(ptr)
    }

    /// Read a NUL-terminated string from module memory
    fn read_cstring(&mut self, ptr: i32) -> Result<String> {
        if ptr < 0 {
            return Err(BridgeError::SourceCall(format!(
                "module returned error pointer {}",
                ptr
            )));
        }
        let memory = self.memory()?;
        let data = memory.data(&self.store);
        let start = ptr as usize;
        if start >= data.len() {
            return Err(BridgeError::SourceCall("result pointer out of bounds".into()));
        }
        let end = data[start..]
            .iter()
            .position(|&b| b == 0)
            .map(|i| start + i)
            .ok_or_else(|| BridgeError::SourceCall("unterminated result string".into()))?;

        String::from_utf8(data[start..end].to_vec())
            .map_err(|e| BridgeError::SourceCall(format!("result is not UTF-8: {}", e)))
    }
}

/// Per-store host state: WASI context plus the bridge's own host services
pub struct HostState {
    wasi: WasiCtx,
    table: ResourceTable,
    adapter: WasiPreview1Adapter,
    pub(crate) http_responses: HashMap<u32, Vec<u8>>,
    limiter: StoreLimits,
}

impl HostState {
    fn new(memory_limit: usize) -> Self {
        let mut builder = wasmtime_wasi::preview2::WasiCtxBuilder::new();
        builder
            .inherit_stdio()
            .inherit_network()
            .allow_ip_name_lookup(true);

        Self {
            wasi: builder.build(),
            table: ResourceTable::new(),
            adapter: WasiPreview1Adapter::new(),
            http_responses: HashMap::new(),
            limiter: StoreLimits::new(memory_limit),
        }
    }
}

impl WasiView for HostState {
    fn table(&mut self) -> &mut ResourceTable {
        &mut self.table
    }
    fn ctx(&mut self) -> &mut WasiCtx {
        &mut self.wasi
    }
}

impl WasiPreview1View for HostState {
    fn adapter(&self) -> &WasiPreview1Adapter {
        &self.adapter
    }
    fn adapter_mut(&mut self) -> &mut WasiPreview1Adapter {
        &mut self.adapter
    }
}

/// Memory growth limiter for loaded modules
pub struct StoreLimits {
    max_memory_bytes: usize,
    current_memory_bytes: usize,
}

impl StoreLimits {
    pub fn new(max_memory_bytes: usize) -> Self {
        Self {
            max_memory_bytes,
            current_memory_bytes: 0,
        }
    }

    pub fn current_memory(&self) -> usize {
        self.current_memory_bytes
    }
}

impl ResourceLimiter for StoreLimits {
    fn memory_growing(
        &mut self,
        current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> std::result::Result<bool, anyhow::Error> {
        let delta = desired.saturating_sub(current);
        let new_total = self.current_memory_bytes.saturating_add(delta);

        if new_total <= self.max_memory_bytes {
            self.current_memory_bytes = new_total;
            Ok(true)
        } else {
            tracing::warn!(
                current,
                desired,
                limit = self.max_memory_bytes,
                "Module memory limit exceeded"
            );
            Ok(false)
        }
    }

    fn table_growing(
        &mut self,
        _current: u32,
        _desired: u32,
        _maximum: Option<u32>,
    ) -> std::result::Result<bool, anyhow::Error> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    /// An archive holding an empty-but-valid module
    fn write_empty_module_archive(path: &Path) {
        let mut module = Vec::new();
        module.extend_from_slice(&crate::loader::wasmbin::MAGIC);
        module.extend_from_slice(&crate::loader::wasmbin::VERSION);

        let file = std::fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer
            .start_file("module.wasm", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(&module).unwrap();
        writer.finish().unwrap();
    }

    #[tokio::test]
    async fn test_load_opens_single_namespace() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("com.example.foo-v1.4.0.mod");
        write_empty_module_archive(&path);

        let registry = ModuleRegistry::new().unwrap();
        let first = registry.load(&path).await.unwrap();
        assert_eq!(registry.open_count().await, 1);

        // A second load fully replaces the first namespace
        let second = registry.load(&path).await.unwrap();
        assert_eq!(registry.open_count().await, 1);
        assert!(second.generation > first.generation);
    }

    #[tokio::test]
    async fn test_unload_releases_namespace() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("com.example.foo-v1.4.0.mod");
        write_empty_module_archive(&path);

        let registry = ModuleRegistry::new().unwrap();
        registry.load(&path).await.unwrap();

        assert!(registry.unload(&path).await);
        assert_eq!(registry.open_count().await, 0);
        // Unload on a closed path is a no-op
        assert!(!registry.unload(&path).await);
    }

    #[tokio::test]
    async fn test_instantiate_missing_entry_point() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("com.example.foo-v1.4.0.mod");
        write_empty_module_archive(&path);

        let registry = ModuleRegistry::new().unwrap();
        let result = registry
            .instantiate(
                "com.example.foo",
                Some("com.example.foo.ExampleSource"),
                None,
                &path,
            )
            .await;
        assert!(matches!(result, Err(BridgeError::InvalidExtension(_))));
        // instantiate opened the namespace on demand
        assert_eq!(registry.open_count().await, 1);
    }

    #[tokio::test]
    async fn test_instantiate_without_entry_metadata() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("com.example.foo-v1.4.0.mod");
        write_empty_module_archive(&path);

        let registry = ModuleRegistry::new().unwrap();
        let result = registry
            .instantiate("com.example.foo", None, None, &path)
            .await;
        assert!(matches!(result, Err(BridgeError::InvalidExtension(_))));
    }

    #[tokio::test]
    async fn test_load_missing_archive_fails() {
        let registry = ModuleRegistry::new().unwrap();
        let result = registry.load(Path::new("/nonexistent/x.mod")).await;
        assert!(result.is_err());
        assert_eq!(registry.open_count().await, 0);
    }

    #[test]
    fn test_descriptors_from_object_and_array() {
        let single = serde_json::json!({"id": 7, "name": "One"});
        assert_eq!(descriptors_from(single).unwrap().len(), 1);

        let many = serde_json::json!([
            {"id": 7, "name": "One"},
            {"id": 8, "name": "Two"}
        ]);
        assert_eq!(descriptors_from(many).unwrap().len(), 2);

        assert!(descriptors_from(serde_json::json!(42)).is_err());
    }

    #[test]
    fn test_store_limits() {
        let mut limits = StoreLimits::new(1024);
        assert!(limits.memory_growing(0, 512, None).unwrap());
        assert_eq!(limits.current_memory(), 512);
        assert!(limits.memory_growing(512, 1024, None).unwrap());
        assert!(!limits.memory_growing(1024, 2048, None).unwrap());
        assert_eq!(limits.current_memory(), 1024);
    }
}
