//! API routes

use crate::api::handlers::{
    get_chapter_list, get_filters, get_latest_titles, get_page_list, get_popular_titles,
    get_solver_config, get_title_details, health_check, install_extension, list_extensions,
    list_repo_extensions, list_sources, search_title, set_extension_proxy, set_preference,
    set_repo_url, set_solver_config, uninstall_extension, update_extension, AppState,
};
use axum::{
    routing::{get, post},
    Router,
};

/// Build the API routes: one route per bridge operation
pub fn build_api_routes(state: AppState) -> Router {
    Router::new()
        // Repository
        .route("/api/v1/repo/url", post(set_repo_url))
        .route("/api/v1/repo/extensions", get(list_repo_extensions))
        // Extension lifecycle
        .route("/api/v1/extensions", get(list_extensions))
        .route("/api/v1/extensions/install", post(install_extension))
        .route("/api/v1/extensions/update", post(update_extension))
        .route("/api/v1/extensions/uninstall", post(uninstall_extension))
        .route("/api/v1/extensions/:pkg/proxy", post(set_extension_proxy))
        // Catalog queries
        .route("/api/v1/sources", get(list_sources))
        .route("/api/v1/sources/:id/search", post(search_title))
        .route("/api/v1/sources/:id/popular", get(get_popular_titles))
        .route("/api/v1/sources/:id/latest", get(get_latest_titles))
        .route("/api/v1/sources/:id/details", post(get_title_details))
        .route("/api/v1/sources/:id/chapters", post(get_chapter_list))
        .route("/api/v1/sources/:id/pages", post(get_page_list))
        .route("/api/v1/sources/:id/filters", get(get_filters))
        .route("/api/v1/sources/:id/preferences", post(set_preference))
        // System
        .route("/api/v1/health", get(health_check))
        .route("/api/v1/solver", get(get_solver_config).put(set_solver_config))
        .with_state(state)
}
