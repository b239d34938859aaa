pub mod provider;
pub mod service;
pub mod types;

pub use provider::{EmbeddingProvider, LlmProvider};
pub use service::LlmService;
pub use types::{ChatCompletion, ChatMessage, ChatRequest, ProviderModel, TokenUsage};
