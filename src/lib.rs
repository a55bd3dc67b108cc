//! yomu-bridge library
//!
//! A plugin-execution bridge: converts third-party extension packages into
//! host-loadable wasm module archives, loads them in isolated namespaces,
//! and exposes their catalog capabilities over an HTTP RPC surface.

pub mod api;
pub mod core;
pub mod extension;
pub mod loader;
pub mod repo;
pub mod store;

// Re-export commonly used types
pub use crate::core::{BridgeError, Config, Logger};
pub use api::{AppState, BridgeServer};
pub use extension::ExtensionManager;
pub use loader::{ModuleLoader, ModuleRegistry, WasmExtensionLoader};
pub use repo::{HttpRepoClient, RepoIndex};
pub use store::ConfigStore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type alias for the library
pub type Result<T> = crate::core::error::Result<T>;
