use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::agent::AgentMode;
use crate::core::errors::ApiError;
use crate::core::security::require_api_key;
use crate::llm::ChatMessage;
use crate::state::AppState;

const TITLE_CHARS: usize = 60;

#[derive(Debug, Deserialize)]
pub struct ChatPayload {
    pub message: String,
    pub session_id: Option<String>,
    pub mode: Option<String>,
    /// Restricts retrieval to one collection; all collections when absent.
    pub collection: Option<String>,
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<ChatPayload>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.api_token)?;

    let message = payload.message.trim();
    if message.is_empty() {
        return Err(ApiError::BadRequest("Message cannot be empty".to_string()));
    }

    let settings = state.settings()?;
    let mode = AgentMode::resolve(payload.mode.as_deref(), &settings.agent.default_mode)?;

    let session_id = match payload.session_id.filter(|id| !id.trim().is_empty()) {
        Some(id) => id,
        None => {
            let title: String = message.chars().take(TITLE_CHARS).collect();
            state.history.create_session(Some(title)).await?
        }
    };

    let history = if settings.agent.history_window == 0 {
        Vec::new()
    } else {
        state
            .history
            .get_history(&session_id, settings.agent.history_window as i64)
            .await?
            .into_iter()
            .filter(|msg| matches!(msg.role.as_str(), "user" | "assistant"))
            .map(|msg| ChatMessage::new(msg.role, msg.content))
            .collect()
    };

    state
        .history
        .add_message(&session_id, "user", message, Some(json!({ "mode": mode })))
        .await?;

    let outcome = state
        .runner
        .run(&settings, mode, history, message, payload.collection.as_deref())
        .await?;

    state
        .history
        .add_message(
            &session_id,
            "assistant",
            &outcome.answer,
            Some(json!({
                "mode": outcome.mode,
                "sources": outcome.sources,
                "steps": outcome.steps.len(),
                "finished": outcome.finished,
            })),
        )
        .await?;

    Ok(Json(json!({
        "session_id": session_id,
        "answer": outcome.answer,
        "mode": outcome.mode,
        "steps": outcome.steps,
        "sources": outcome.sources,
        "finished": outcome.finished,
    })))
}
