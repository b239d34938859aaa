use async_trait::async_trait;

use super::types::{ChatCompletion, ChatRequest, ProviderModel};
use crate::core::errors::ApiError;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// return the provider name (e.g. "openai", "huggingface")
    fn name(&self) -> &str;

    /// check if the provider is reachable with the configured credentials
    async fn health_check(&self) -> Result<bool, ApiError>;

    /// list available models from the provider
    async fn list_models(&self) -> Result<Vec<ProviderModel>, ApiError>;

    /// model used when the agent settings do not name one
    fn default_chat_model(&self) -> Option<&str> {
        None
    }

    /// chat completion (non-streaming)
    async fn chat(&self, request: ChatRequest, model_id: &str) -> Result<ChatCompletion, ApiError>;
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    /// model identifier recorded alongside stored vectors
    fn model(&self) -> &str;

    /// expected vector length, when the provider declares one
    fn dimension(&self) -> Option<usize>;

    /// one vector per input, in input order
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError>;
}
