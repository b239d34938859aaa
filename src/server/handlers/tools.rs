use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::errors::ApiError;
use crate::core::security::require_api_key;
use crate::state::AppState;
use crate::tools::ToolPolicy;

#[derive(Debug, Default, Deserialize)]
pub struct ExecuteToolRequest {
    #[serde(default)]
    pub args: Value,
}

pub async fn list_tools(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.api_token)?;
    let settings = state.settings()?;
    let policy = ToolPolicy::from_value(&settings.agent.tool_policy);
    Ok(Json(json!({"tools": state.tools.list(&policy)})))
}

/// Runs a tool directly under the configured tool policy.
pub async fn execute_tool(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(payload): Json<ExecuteToolRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.api_token)?;
    let settings = state.settings()?;
    let policy = ToolPolicy::from_value(&settings.agent.tool_policy);
    let output = state.tools.execute(&name, payload.args, &policy).await?;
    Ok(Json(json!({"tool": name, "output": output})))
}
