//! RAG Context Builder.
//!
//! Formats ranked search results into a cited context block for the prompt.

use serde::{Deserialize, Serialize};

use super::store::ChunkSearchResult;

/// Context text plus the sources it cites, in first-cited order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuiltContext {
    pub text: String,
    pub sources: Vec<String>,
}

impl BuiltContext {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ContextBuilder {
    max_context_length: usize,
}

impl ContextBuilder {
    pub fn new(max_context_length: usize) -> Self {
        Self { max_context_length }
    }

    /// Builds `[n] (source)` blocks in rank order, stopping before the
    /// context would exceed `max_context_length` characters.
    pub fn build(&self, results: &[ChunkSearchResult]) -> BuiltContext {
        let mut text = String::new();
        let mut length = 0usize;
        let mut sources: Vec<String> = Vec::new();

        for (i, result) in results.iter().enumerate() {
            let block = format!(
                "[{}] ({})\n{}",
                i + 1,
                result.chunk.source,
                result.chunk.content.trim()
            );
            let separator = if text.is_empty() { 0 } else { 2 };
            let block_length = block.chars().count() + separator;

            if length + block_length > self.max_context_length {
                break;
            }

            if separator > 0 {
                text.push_str("\n\n");
            }
            text.push_str(&block);
            length += block_length;

            if !sources.contains(&result.chunk.source) {
                sources.push(result.chunk.source.clone());
            }
        }

        BuiltContext { text, sources }
    }
}
