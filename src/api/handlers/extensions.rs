//! Extension lifecycle handlers
//!
//! Mutating operations answer with the `{success, error?}` envelope and a
//! 200 status regardless of outcome; listing endpoints are pure reads and
//! propagate failures as transport-level errors.

use crate::api::handlers::AppState;
use crate::api::models::{
    ExtensionInfoResponse, HealthResponse, MutationResponse, PackageRequest,
    RepoExtensionResponse, SetProxyRequest, SetRepoUrlRequest, SolverConfigBody,
};
use crate::core::error::Result;
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use tracing::error;

/// Handler for POST /api/v1/repo/url - Point the bridge at a repository
pub async fn set_repo_url(
    State(state): State<AppState>,
    Json(request): Json<SetRepoUrlRequest>,
) -> impl IntoResponse {
    match state.manager.set_repo_url(&request.url) {
        Ok(()) => Json(MutationResponse::ok()),
        Err(e) => {
            error!(error = %e, "Failed to set repo URL");
            Json(MutationResponse::failure(e))
        }
    }
}

/// Handler for GET /api/v1/repo/extensions - List installable packages
pub async fn list_repo_extensions(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let entries = state.manager.list_repo_extensions().await?;
    let responses: Vec<RepoExtensionResponse> =
        entries.into_iter().map(RepoExtensionResponse::from).collect();
    Ok(Json(responses))
}

/// Handler for GET /api/v1/extensions - List installed extensions
pub async fn list_extensions(State(state): State<AppState>) -> impl IntoResponse {
    let extensions: Vec<ExtensionInfoResponse> = state
        .manager
        .list_extensions()
        .into_iter()
        .map(ExtensionInfoResponse::from)
        .collect();
    Json(extensions)
}

/// Handler for POST /api/v1/extensions/install - Install from the repository
pub async fn install_extension(
    State(state): State<AppState>,
    Json(request): Json<PackageRequest>,
) -> impl IntoResponse {
    match state.manager.install(&request.pkg).await {
        Ok(record) => Json(MutationResponse::with_payload(ExtensionInfoResponse::from(
            record,
        ))),
        Err(e) => {
            error!(pkg = %request.pkg, error = %e, "Install failed");
            Json(MutationResponse::failed(e))
        }
    }
}

/// Handler for POST /api/v1/extensions/update - Update to the repo version
pub async fn update_extension(
    State(state): State<AppState>,
    Json(request): Json<PackageRequest>,
) -> impl IntoResponse {
    match state.manager.update(&request.pkg).await {
        Ok(record) => Json(MutationResponse::with_payload(ExtensionInfoResponse::from(
            record,
        ))),
        Err(e) => {
            error!(pkg = %request.pkg, error = %e, "Update failed");
            Json(MutationResponse::failed(e))
        }
    }
}

/// Handler for POST /api/v1/extensions/uninstall - Remove an extension
pub async fn uninstall_extension(
    State(state): State<AppState>,
    Json(request): Json<PackageRequest>,
) -> impl IntoResponse {
    match state.manager.uninstall(&request.pkg).await {
        Ok(()) => Json(MutationResponse::ok()),
        Err(e) => {
            error!(pkg = %request.pkg, error = %e, "Uninstall failed");
            Json(MutationResponse::failure(e))
        }
    }
}

/// Handler for POST /api/v1/extensions/:pkg/proxy - Toggle the proxy flag
pub async fn set_extension_proxy(
    State(state): State<AppState>,
    Path(pkg): Path<String>,
    Json(request): Json<SetProxyRequest>,
) -> impl IntoResponse {
    match state.manager.set_use_proxy(&pkg, request.use_proxy) {
        Ok(()) => Json(MutationResponse::ok()),
        Err(e) => Json(MutationResponse::failure(e)),
    }
}

/// Handler for GET /api/v1/health - Liveness plus loaded source count
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "OK".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        loaded_sources: state.manager.loaded_source_count().await,
        timestamp: chrono::Utc::now().timestamp(),
    })
}

/// Handler for GET /api/v1/solver - Anti-bot solver configuration
pub async fn get_solver_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(SolverConfigBody::from(state.store.solver_config()))
}

/// Handler for PUT /api/v1/solver - Replace the solver configuration
pub async fn set_solver_config(
    State(state): State<AppState>,
    Json(body): Json<SolverConfigBody>,
) -> impl IntoResponse {
    match state.store.set_solver_config(body.into()) {
        Ok(()) => Json(MutationResponse::ok()),
        Err(e) => {
            error!(error = %e, "Failed to update solver config");
            Json(MutationResponse::failure(e))
        }
    }
}
