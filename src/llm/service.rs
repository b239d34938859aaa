use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use super::provider::LlmProvider;
use super::types::{ChatCompletion, ChatRequest};
use crate::core::config::settings::AgentSettings;
use crate::core::errors::ApiError;
use crate::metrics::MetricsRecorder;

/// Routes chat calls to the provider named in the agent settings.
#[derive(Clone)]
pub struct LlmService {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    metrics: MetricsRecorder,
}

impl LlmService {
    pub fn new(metrics: MetricsRecorder) -> Self {
        Self {
            providers: HashMap::new(),
            metrics,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.providers.insert(provider.name().to_string(), provider);
        self
    }

    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn provider(&self, name: &str) -> Result<Arc<dyn LlmProvider>, ApiError> {
        self.providers.get(name).cloned().ok_or_else(|| {
            ApiError::NotConfigured(format!(
                "LLM provider '{}' is not configured (available: {:?})",
                name,
                self.provider_names()
            ))
        })
    }

    pub async fn chat(
        &self,
        settings: &AgentSettings,
        request: ChatRequest,
    ) -> Result<ChatCompletion, ApiError> {
        let provider = self.provider(&settings.chat_provider)?;
        let model = settings
            .chat_model
            .as_deref()
            .map(str::trim)
            .filter(|model| !model.is_empty())
            .or_else(|| provider.default_chat_model())
            .ok_or_else(|| {
                ApiError::NotConfigured(format!(
                    "No chat model configured for provider '{}' (set agent.chat_model)",
                    provider.name()
                ))
            })?
            .to_string();
        let request = request.with_settings(settings);

        tracing::debug!(
            "LLM chat via {} ({}), {} messages",
            provider.name(),
            model,
            request.messages.len()
        );

        let started = Instant::now();
        let result = provider.chat(request, &model).await;
        self.metrics
            .record("llm.chat", started.elapsed(), result.is_ok());

        match &result {
            Ok(completion) => {
                if let Some(usage) = &completion.usage {
                    self.metrics
                        .record_tokens(usage.prompt_tokens, usage.completion_tokens);
                }
            }
            Err(err) => tracing::warn!("LLM chat via {} failed: {}", provider.name(), err),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::HuggingFaceConnector;
    use crate::core::config::settings::HuggingFaceSettings;
    use crate::llm::types::{ChatMessage, ProviderModel, TokenUsage};
    use async_trait::async_trait;
    use httpmock::prelude::*;
    use serde_json::json;

    struct StaticProvider;

    #[async_trait]
    impl LlmProvider for StaticProvider {
        fn name(&self) -> &str {
            "static"
        }

        async fn health_check(&self) -> Result<bool, ApiError> {
            Ok(true)
        }

        async fn list_models(&self) -> Result<Vec<ProviderModel>, ApiError> {
            Ok(Vec::new())
        }

        async fn chat(
            &self,
            request: ChatRequest,
            model_id: &str,
        ) -> Result<ChatCompletion, ApiError> {
            Ok(ChatCompletion {
                content: format!(
                    "{}:{}:{:?}",
                    model_id,
                    request.messages.len(),
                    request.max_tokens
                ),
                usage: Some(TokenUsage {
                    prompt_tokens: 3,
                    completion_tokens: 4,
                }),
            })
        }
    }

    #[tokio::test]
    async fn routes_to_configured_provider_and_records_usage() {
        let metrics = MetricsRecorder::new();
        let service = LlmService::new(metrics.clone()).with_provider(Arc::new(StaticProvider));
        let settings = AgentSettings {
            chat_provider: "static".to_string(),
            chat_model: Some("m1".to_string()),
            max_tokens: 99,
            ..Default::default()
        };

        let completion = service
            .chat(&settings, ChatRequest::new(vec![ChatMessage::user("hi")]))
            .await
            .unwrap();

        assert_eq!(completion.content, "m1:1:Some(99)");
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.operations["llm.chat"].count, 1);
        assert_eq!(snapshot.tokens.total, 7);
    }

    #[tokio::test]
    async fn unset_chat_model_uses_provider_default() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/models/HuggingFaceH4/zephyr-7b-beta");
                then.status(200).json_body(json!([{ "generated_text": "hello" }]));
            })
            .await;
        let huggingface = HuggingFaceConnector::from_settings(&HuggingFaceSettings {
            api_key: Some("hf_test".to_string()),
            base_url: server.base_url(),
            chat_model: Some("HuggingFaceH4/zephyr-7b-beta".to_string()),
            ..Default::default()
        })
        .unwrap();
        let service = LlmService::new(MetricsRecorder::new())
            .with_provider(Arc::new(huggingface))
            .with_provider(Arc::new(StaticProvider));

        let settings = AgentSettings {
            chat_provider: "huggingface".to_string(),
            ..Default::default()
        };
        let completion = service
            .chat(&settings, ChatRequest::new(vec![ChatMessage::user("hi")]))
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(completion.content, "hello");

        let settings = AgentSettings {
            chat_provider: "static".to_string(),
            ..Default::default()
        };
        let err = service
            .chat(&settings, ChatRequest::new(Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn unknown_provider_is_not_configured() {
        let service = LlmService::new(MetricsRecorder::new());
        let err = service
            .chat(&AgentSettings::default(), ChatRequest::new(Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotConfigured(_)));
    }
}
