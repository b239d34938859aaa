use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::errors::ApiError;
use crate::core::security::require_api_key;
use crate::records::{embed_dataset, remove_dataset, remove_record};
use crate::state::AppState;

/// Exactly one of `csv`, `url` or `path` supplies the data.
#[derive(Debug, Deserialize)]
pub struct LoadDatasetRequest {
    pub name: String,
    pub csv: Option<String>,
    pub url: Option<String>,
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub embed: bool,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_datasets(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.api_token)?;
    let datasets = state.records.list_datasets().await?;
    Ok(Json(json!({"datasets": datasets})))
}

pub async fn load_dataset(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<LoadDatasetRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.api_token)?;

    // No rows are written when embedding was requested without an embedder.
    let knowledge = if payload.embed {
        Some(state.knowledge()?.clone())
    } else {
        None
    };

    let report = match (&payload.csv, &payload.url, &payload.path) {
        (Some(csv), None, None) => state.loader.load_csv_str(&payload.name, csv).await?,
        (None, Some(url), None) => state.loader.download_csv(&payload.name, url).await?,
        (None, None, Some(path)) => state.loader.load_csv_file(&payload.name, path).await?,
        _ => {
            return Err(ApiError::BadRequest(
                "Provide exactly one of csv, url or path".to_string(),
            ))
        }
    };

    let embedded_chunks = match knowledge {
        Some(knowledge) => Some(embed_dataset(&state.records, &knowledge, &payload.name).await?),
        None => None,
    };

    Ok(Json(json!({
        "dataset": report.dataset,
        "rows": report.rows,
        "embedded_chunks": embedded_chunks,
    })))
}

pub async fn delete_dataset(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(dataset): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.api_token)?;
    let deleted = remove_dataset(&state.records, state.knowledge.as_deref(), &dataset).await?;
    Ok(Json(json!({"dataset": dataset, "deleted": deleted})))
}

pub async fn list_records(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(dataset): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.api_token)?;
    let records = state
        .records
        .list(&dataset, page.limit.unwrap_or(100), page.offset.unwrap_or(0))
        .await?;
    let total = state.records.count(Some(&dataset)).await?;
    Ok(Json(json!({"dataset": dataset, "total": total, "records": records})))
}

pub async fn create_record(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(dataset): Path<String>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.api_token)?;
    let record = state.records.create(&dataset, payload).await?;
    Ok(Json(json!({"record": record})))
}

pub async fn get_record(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.api_token)?;
    let record = state
        .records
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Record {} not found", id)))?;
    Ok(Json(json!({"record": record})))
}

pub async fn replace_record(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.api_token)?;
    let record = state.records.update(id, payload, false).await?;
    Ok(Json(json!({"record": record})))
}

pub async fn patch_record(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.api_token)?;
    let record = state.records.update(id, payload, true).await?;
    Ok(Json(json!({"record": record})))
}

pub async fn delete_record(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.api_token)?;
    let record = remove_record(&state.records, state.knowledge.as_deref(), id).await?;
    Ok(Json(json!({"success": true, "dataset": record.dataset})))
}
