//! Agent toolset: the `Tool` trait, built-in tools and the policy-aware registry.

mod media;
mod policy;
mod records;
mod registry;
mod search;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

pub use media::{DescribeImageTool, RenderImageTool};
pub use policy::ToolPolicy;
pub use records::{
    CreateRecordTool, DeleteRecordTool, GetRecordTool, ListDatasetsTool, ListRecordsTool,
    UpdateRecordTool,
};
pub use registry::ToolRegistry;
pub use search::SearchDocumentsTool;

use crate::core::errors::ApiError;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolOutput {
    pub content: String,
    /// Document sources or URLs the output was drawn from.
    pub sources: Vec<String>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            sources: Vec::new(),
        }
    }

    pub fn json(value: &Value) -> Result<Self, ApiError> {
        serde_json::to_string_pretty(value)
            .map(Self::text)
            .map_err(ApiError::internal)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema object describing the arguments.
    pub parameters: Value,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters(&self) -> Value;

    async fn execute(&self, args: Value) -> Result<ToolOutput, ApiError>;
}

pub(crate) fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ApiError> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("Missing required argument: {}", key)))
}

pub(crate) fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Integer argument, also accepting numeric strings from looser models.
pub(crate) fn optional_i64(args: &Value, key: &str) -> Result<Option<i64>, ApiError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| ApiError::BadRequest(format!("Argument {} must be an integer", key))),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| ApiError::BadRequest(format!("Argument {} must be an integer", key))),
        Some(_) => Err(ApiError::BadRequest(format!("Argument {} must be an integer", key))),
    }
}

pub(crate) fn required_i64(args: &Value, key: &str) -> Result<i64, ApiError> {
    optional_i64(args, key)?
        .ok_or_else(|| ApiError::BadRequest(format!("Missing required argument: {}", key)))
}

pub(crate) fn required_object(args: &Value, key: &str) -> Result<Value, ApiError> {
    match args.get(key) {
        Some(value @ Value::Object(_)) => Ok(value.clone()),
        Some(_) => Err(ApiError::BadRequest(format!("Argument {} must be an object", key))),
        None => Err(ApiError::BadRequest(format!("Missing required argument: {}", key))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn argument_helpers() {
        let args = json!({ "query": " cats ", "limit": "3", "id": 7, "data": { "a": 1 }, "blank": "" });

        assert_eq!(required_str(&args, "query").unwrap(), "cats");
        assert!(matches!(required_str(&args, "blank"), Err(ApiError::BadRequest(m)) if m.contains("blank")));
        assert_eq!(optional_i64(&args, "limit").unwrap(), Some(3));
        assert_eq!(required_i64(&args, "id").unwrap(), 7);
        assert!(required_i64(&args, "missing").is_err());
        assert!(required_object(&args, "data").is_ok());
        assert!(required_object(&args, "query").is_err());
        assert_eq!(optional_str(&args, "blank"), None);
    }
}
