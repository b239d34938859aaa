use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{optional_i64, optional_str, required_str, Tool, ToolOutput};
use crate::core::errors::ApiError;
use crate::rag::KnowledgeBase;

const MAX_LIMIT: i64 = 20;

/// Semantic search over the ingested documents and embedded datasets.
pub struct SearchDocumentsTool {
    knowledge: Arc<KnowledgeBase>,
}

impl SearchDocumentsTool {
    pub fn new(knowledge: Arc<KnowledgeBase>) -> Self {
        Self { knowledge }
    }
}

#[async_trait]
impl Tool for SearchDocumentsTool {
    fn name(&self) -> &str {
        "search_documents"
    }

    fn description(&self) -> &str {
        "Search the knowledge base for passages relevant to a query. Returns numbered passages with their sources."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "What to look for" },
                "limit": { "type": "integer", "minimum": 1, "maximum": MAX_LIMIT },
                "collection": { "type": "string", "description": "Restrict to one collection, e.g. \"datasets\"" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, ApiError> {
        let query = required_str(&args, "query")?;
        let limit = optional_i64(&args, "limit")?.map(|l| l.clamp(1, MAX_LIMIT) as usize);
        let collection = optional_str(&args, "collection");

        let results = self.knowledge.retrieve(query, limit, collection).await?;
        if results.is_empty() {
            return Ok(ToolOutput::text("No matching documents found."));
        }

        let mut sources: Vec<String> = Vec::new();
        let passages: Vec<String> = results
            .iter()
            .enumerate()
            .map(|(i, result)| {
                if !sources.contains(&result.chunk.source) {
                    sources.push(result.chunk.source.clone());
                }
                format!(
                    "[{}] ({}, score {:.2})\n{}",
                    i + 1,
                    result.chunk.source,
                    result.score,
                    result.chunk.content
                )
            })
            .collect();

        Ok(ToolOutput {
            content: passages.join("\n\n"),
            sources,
        })
    }
}
