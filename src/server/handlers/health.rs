use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::core::security::require_api_key;
use crate::state::AppState;

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn get_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.api_token)?;

    let chunks = match &state.knowledge {
        Some(knowledge) => Some(knowledge.store().count(None).await?),
        None => None,
    };
    let embedding = state.knowledge.as_ref().map(|knowledge| {
        json!({
            "provider": knowledge.embeddings().provider_name(),
            "model": knowledge.embeddings().model(),
        })
    });

    Ok(Json(json!({
        "status": "ok",
        "started_at": state.started_at.to_rfc3339(),
        "chunks": chunks,
        "records": state.records.count(None).await?,
        "sessions": state.history.count_sessions().await?,
        "messages": state.history.get_message_count(None).await?,
        "connectors": state.connectors.configured(),
        "llm_providers": state.llm.provider_names(),
        "embedding": embedding,
        "tools": state.tools.names(),
    })))
}
