use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::core::security::require_api_key;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct IngestTextRequest {
    pub source: String,
    pub content: String,
    pub collection: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IngestUrlRequest {
    pub url: String,
    pub collection: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub limit: Option<usize>,
    pub collection: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SourcesQuery {
    pub collection: Option<String>,
}

pub async fn ingest_text(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<IngestTextRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.api_token)?;
    if payload.source.trim().is_empty() {
        return Err(ApiError::BadRequest("source is required".to_string()));
    }

    let report = state
        .knowledge()?
        .ingest_text(
            payload.source.trim(),
            &payload.content,
            payload.collection.as_deref(),
        )
        .await?;
    Ok(Json(json!({"ingested": report})))
}

pub async fn ingest_url(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<IngestUrlRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.api_token)?;
    let report = state
        .knowledge()?
        .ingest_url(&payload.url, payload.collection.as_deref())
        .await?;
    Ok(Json(json!({"ingested": report})))
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.api_token)?;
    let results = state
        .knowledge()?
        .retrieve(&params.q, params.limit, params.collection.as_deref())
        .await?;
    Ok(Json(json!({"results": results})))
}

pub async fn list_sources(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<SourcesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.api_token)?;
    let sources = state
        .knowledge()?
        .store()
        .list_sources(params.collection.as_deref())
        .await?;
    Ok(Json(json!({"sources": sources})))
}

pub async fn delete_collection(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(collection): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.api_token)?;
    let deleted = state.knowledge()?.store().delete_collection(&collection).await?;
    tracing::info!("Deleted collection '{}' ({} chunks)", collection, deleted);
    Ok(Json(json!({"collection": collection, "deleted": deleted})))
}
