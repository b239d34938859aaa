use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::core::security::require_api_key;
use crate::history::SessionInfo;
use crate::state::AppState;

const DEFAULT_MESSAGE_LIMIT: i64 = 100;

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSessionRequest {
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub limit: Option<i64>,
}

fn session_not_found(session_id: &str) -> ApiError {
    ApiError::NotFound(format!("Session {} not found", session_id))
}

async fn find_session(state: &AppState, session_id: &str) -> Result<SessionInfo, ApiError> {
    state
        .history
        .get_session(session_id)
        .await?
        .ok_or_else(|| session_not_found(session_id))
}

pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.api_token)?;
    let sessions = state.history.list_sessions().await?;
    Ok(Json(json!({"sessions": sessions})))
}

pub async fn create_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.api_token)?;
    let session_id = state.history.create_session(payload.title).await?;
    let session = find_session(&state, &session_id).await?;
    Ok(Json(json!({"session": session})))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.api_token)?;
    let session = find_session(&state, &session_id).await?;
    let messages = state
        .history
        .get_history(&session_id, DEFAULT_MESSAGE_LIMIT)
        .await?;
    Ok(Json(json!({"session": session, "messages": messages})))
}

pub async fn get_session_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.api_token)?;
    let limit = query.limit.unwrap_or(DEFAULT_MESSAGE_LIMIT).max(1);
    let messages = state.history.get_history(&session_id, limit).await?;
    Ok(Json(json!({"session_id": session_id, "messages": messages})))
}

pub async fn update_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Json(payload): Json<UpdateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.api_token)?;
    let title = payload.title.trim();
    if title.is_empty() {
        return Err(ApiError::BadRequest("title must not be empty".to_string()));
    }
    if !state.history.update_session_title(&session_id, title).await? {
        return Err(session_not_found(&session_id));
    }
    Ok(Json(json!({"success": true})))
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.api_token)?;
    if !state.history.delete_session(&session_id).await? {
        return Err(session_not_found(&session_id));
    }
    Ok(Json(json!({"success": true})))
}
