//! Catalog query handlers
//!
//! Pure read queries: failures (unknown source id, missing capability,
//! delegated plugin faults) propagate as transport-level errors because
//! there is no well-formed empty payload for them. `SetPreference` is the
//! one mutating call here and uses the envelope.

use crate::api::handlers::AppState;
use crate::api::models::{
    ChapterUrlRequest, ChaptersResponse, FiltersResponse, MutationResponse, PageQuery,
    PagesResponse, SearchRequest, SetPreferenceRequest, SourceInfoResponse, TitleResponse,
    TitleUrlRequest, TitlesPageResponse,
};
use crate::core::error::Result;
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use tracing::error;

/// Handler for GET /api/v1/sources - Sources with a live instance
pub async fn list_sources(State(state): State<AppState>) -> impl IntoResponse {
    let sources: Vec<SourceInfoResponse> = state
        .manager
        .list_sources()
        .await
        .into_iter()
        .map(|record| SourceInfoResponse {
            id: record.id,
            name: record.name,
            lang: record.lang,
            supports_latest: record.supports_latest,
        })
        .collect();
    Json(sources)
}

/// Handler for POST /api/v1/sources/:id/search - Catalog keyword search
pub async fn search_title(
    State(state): State<AppState>,
    Path(source_id): Path<i64>,
    Json(request): Json<SearchRequest>,
) -> Result<impl IntoResponse> {
    let page = state
        .manager
        .search(source_id, &request.query, request.page)
        .await?;
    Ok(Json(TitlesPageResponse {
        titles: page.titles,
        has_next_page: page.has_next_page,
    }))
}

/// Handler for GET /api/v1/sources/:id/popular - Popular titles
pub async fn get_popular_titles(
    State(state): State<AppState>,
    Path(source_id): Path<i64>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse> {
    let page = state.manager.popular(source_id, query.page).await?;
    Ok(Json(TitlesPageResponse {
        titles: page.titles,
        has_next_page: page.has_next_page,
    }))
}

/// Handler for GET /api/v1/sources/:id/latest - Latest updates
pub async fn get_latest_titles(
    State(state): State<AppState>,
    Path(source_id): Path<i64>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse> {
    let page = state.manager.latest(source_id, query.page).await?;
    Ok(Json(TitlesPageResponse {
        titles: page.titles,
        has_next_page: page.has_next_page,
    }))
}

/// Handler for POST /api/v1/sources/:id/details - Title details
pub async fn get_title_details(
    State(state): State<AppState>,
    Path(source_id): Path<i64>,
    Json(request): Json<TitleUrlRequest>,
) -> Result<impl IntoResponse> {
    let title = state.manager.details(source_id, &request.title_url).await?;
    Ok(Json(TitleResponse { title }))
}

/// Handler for POST /api/v1/sources/:id/chapters - Chapter list
pub async fn get_chapter_list(
    State(state): State<AppState>,
    Path(source_id): Path<i64>,
    Json(request): Json<TitleUrlRequest>,
) -> Result<impl IntoResponse> {
    let chapters = state.manager.chapters(source_id, &request.title_url).await?;
    Ok(Json(ChaptersResponse { chapters }))
}

/// Handler for POST /api/v1/sources/:id/pages - Page list for a chapter
pub async fn get_page_list(
    State(state): State<AppState>,
    Path(source_id): Path<i64>,
    Json(request): Json<ChapterUrlRequest>,
) -> Result<impl IntoResponse> {
    let pages = state.manager.pages(source_id, &request.chapter_url).await?;
    Ok(Json(PagesResponse { pages }))
}

/// Handler for GET /api/v1/sources/:id/filters - Preference schema
pub async fn get_filters(
    State(state): State<AppState>,
    Path(source_id): Path<i64>,
) -> Result<impl IntoResponse> {
    let filters = state.manager.preference_schema(source_id).await?;
    Ok(Json(FiltersResponse { filters }))
}

/// Handler for POST /api/v1/sources/:id/preferences - Set one preference
pub async fn set_preference(
    State(state): State<AppState>,
    Path(source_id): Path<i64>,
    Json(request): Json<SetPreferenceRequest>,
) -> impl IntoResponse {
    match state
        .manager
        .set_preference(source_id, &request.key, &request.value)
        .await
    {
        Ok(()) => Json(MutationResponse::ok()),
        Err(e) => {
            error!(source_id, key = %request.key, error = %e, "Set preference failed");
            Json(MutationResponse::failure(e))
        }
    }
}
