use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use super::{Tool, ToolOutput, ToolPolicy, ToolSpec};
use crate::core::errors::ApiError;
use crate::metrics::MetricsRecorder;

/// Named tools, executed under a caller-supplied policy.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
    metrics: MetricsRecorder,
}

impl ToolRegistry {
    pub fn new(metrics: MetricsRecorder) -> Self {
        Self {
            tools: BTreeMap::new(),
            metrics,
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!("Tool '{}' registered twice; keeping the latest", name);
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Tools the policy allows, sorted by name.
    pub fn list(&self, policy: &ToolPolicy) -> Vec<ToolSpec> {
        self.tools
            .values()
            .filter(|tool| policy.is_tool_allowed(tool.name()))
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect()
    }

    pub async fn execute(
        &self,
        name: &str,
        args: Value,
        policy: &ToolPolicy,
    ) -> Result<ToolOutput, ApiError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ApiError::BadRequest(format!("Unknown tool: {}", name)))?;

        if !policy.is_tool_allowed(name) {
            return Err(ApiError::Forbidden(format!(
                "Tool '{}' is not allowed by the tool policy",
                name
            )));
        }

        let args = if args.is_null() {
            Value::Object(Default::default())
        } else {
            args
        };

        tracing::info!("Executing tool {}", name);
        let result = self
            .metrics
            .time(&format!("tool.{}", name), tool.execute(args))
            .await;
        if let Err(err) = &result {
            tracing::warn!("Tool {} failed: {}", name, err);
        }
        result
    }
}
