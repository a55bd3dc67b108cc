//! API handlers

pub mod catalog;
pub mod extensions;

pub use catalog::*;
pub use extensions::*;

use crate::extension::ExtensionManager;
use crate::store::ConfigStore;
use std::sync::Arc;

/// Shared application state for handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ExtensionManager>,
    pub store: Arc<ConfigStore>,
}
