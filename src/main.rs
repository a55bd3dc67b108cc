//! yomu-bridge server binary
//!
//! Bootstrap sequence: configuration, logging, the durable config store,
//! the module pipeline, the extension manager (with startup resync), then
//! the HTTP server until shutdown, then cleanup.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;
use yomu_bridge::{api, core, extension, loader, repo, store};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration (handles CLI args, env vars, and config file)
    let config = match core::config::Config::load() {
        Ok(config) => config,
        Err(e) => {
            // Logging is not up yet
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let _logger = match core::Logger::init(&config.logging) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return Err(e);
        }
    };

    info!("Starting yomu-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!(
        host = %config.server.host,
        port = config.server.port,
        "Server configuration"
    );

    let data_dir = config.data_dir();
    let extensions_dir = config.extensions_dir();
    info!(data_dir = %data_dir.display(), "Data directory");

    std::fs::create_dir_all(&data_dir)?;
    std::fs::create_dir_all(&extensions_dir)?;

    // Durable state; seed the repo URL from static config on first run
    let store = Arc::new(store::ConfigStore::open(&data_dir)?);
    if store.repo_url().is_empty() && !config.repo.index_url.is_empty() {
        store.set_repo_url(&config.repo.index_url)?;
    }

    let repo_client = Arc::new(repo::HttpRepoClient::new(
        store.repo_url(),
        Duration::from_secs(config.repo.fetch_timeout),
    )?);

    // Module pipeline
    let registry = Arc::new(loader::ModuleRegistry::new()?);
    let module_loader = Arc::new(loader::WasmExtensionLoader::new(
        extensions_dir.clone(),
        registry,
    ));

    let manager = Arc::new(extension::ExtensionManager::new(
        extensions_dir,
        module_loader,
        repo_client,
        store.clone(),
    ));

    // Startup resync: drop stale records, load everything installed
    let loaded_sources = manager.init().await?;
    info!(loaded_sources, "Extensions loaded");

    let state = api::AppState {
        manager: manager.clone(),
        store,
    };
    let server = api::BridgeServer::new(config.server.clone(), state);

    info!("yomu-bridge initialized, serving requests");
    server.serve().await?;

    manager.cleanup().await;
    info!("yomu-bridge stopped");
    Ok(())
}
