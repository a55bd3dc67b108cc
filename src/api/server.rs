//! HTTP server
//!
//! Axum server hosting the RPC façade with CORS, request tracing and
//! graceful shutdown on Ctrl-C / SIGTERM.

use crate::api::handlers::AppState;
use crate::api::routes::build_api_routes;
use crate::core::config::ServerConfig;
use axum::Router;
use std::net::SocketAddr;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

/// The bridge's HTTP server
pub struct BridgeServer {
    router: Router,
    config: ServerConfig,
}

impl BridgeServer {
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        let router = build_api_routes(state).layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(Self::cors_layer()),
        );

        Self { router, config }
    }

    fn cors_layer() -> CorsLayer {
        use tower_http::cors::Any;
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    }

    /// Serve until a shutdown signal arrives
    pub async fn serve(self) -> anyhow::Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port).parse()?;

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(addr = %addr, "Bridge server listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Bridge server shut down gracefully");
        Ok(())
    }

    pub fn router(&self) -> &Router {
        &self.router
    }
}

/// Wait for Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }

    info!("Initiating graceful shutdown");
}
