use std::fmt;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::config::settings::OpenAiSettings;
use crate::core::errors::ApiError;
use crate::llm::provider::{EmbeddingProvider, LlmProvider};
use crate::llm::types::{ChatCompletion, ChatRequest, ProviderModel, TokenUsage};

pub const DEFAULT_VISION_MODEL: &str = "gpt-4-vision-preview";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4";
const VISION_MAX_TOKENS: u32 = 330;

#[derive(Clone)]
pub struct OpenAiConnector {
    base_url: String,
    api_key: String,
    organization_id: Option<String>,
    available_models: Vec<String>,
    embedding_model: String,
    client: Client,
}

impl fmt::Debug for OpenAiConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiConnector")
            .field("base_url", &self.base_url)
            .field("uses_organization", &self.organization_id.is_some())
            .field("available_models", &self.available_models)
            .field("embedding_model", &self.embedding_model)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct ModelsResponse {
    data: Vec<ModelInfo>,
}

#[derive(Deserialize)]
struct ModelInfo {
    id: String,
    #[serde(default)]
    owned_by: Option<String>,
}

impl OpenAiConnector {
    pub fn from_settings(settings: &OpenAiSettings) -> Result<Self, ApiError> {
        let api_key = non_empty(settings.api_key.as_deref()).ok_or_else(|| {
            ApiError::NotConfigured("Missing key in settings: connector.openai.api_key".to_string())
        })?;

        let organization_id = if settings.use_organization_id {
            let org = non_empty(settings.organization_id.as_deref()).ok_or_else(|| {
                ApiError::NotConfigured(
                    "Missing key in settings: connector.openai.organization_id \
                     (set use_organization_id: false to skip it)"
                        .to_string(),
                )
            })?;
            Some(org)
        } else {
            None
        };

        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key,
            organization_id,
            available_models: settings.model.clone(),
            embedding_model: settings.embedding_model.clone(),
            client: Client::new(),
        })
    }

    pub fn available_models(&self) -> &[String] {
        &self.available_models
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.client.request(method, url).bearer_auth(&self.api_key);
        if let Some(org) = &self.organization_id {
            builder = builder.header("OpenAI-Organization", org);
        }
        builder
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        let res = self
            .request(Method::POST, path)
            .json(body)
            .send()
            .await
            .map_err(ApiError::upstream)?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "OpenAI {} error ({}): {}",
                path, status, text
            )));
        }

        res.json().await.map_err(ApiError::upstream)
    }

    fn check_model(&self, model: &str) -> Result<(), ApiError> {
        if self.available_models.is_empty() || self.available_models.iter().any(|m| m == model) {
            return Ok(());
        }
        Err(ApiError::BadRequest(format!(
            "Model '{}' is not enabled. Available models: {:?}",
            model, self.available_models
        )))
    }

    /// Single-turn prompt with an attached image.
    pub async fn vision_prompt(
        &self,
        text: &str,
        image_url: &str,
        model: Option<&str>,
    ) -> Result<ChatCompletion, ApiError> {
        if image_url.trim().is_empty() {
            return Err(ApiError::BadRequest("Image URL cannot be empty".to_string()));
        }
        tracing::debug!("OpenAI vision prompt for {}", image_url);

        let body = json!({
            "model": model.unwrap_or(DEFAULT_VISION_MODEL),
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": text },
                    { "type": "image_url", "image_url": { "url": image_url } }
                ]
            }],
            "max_tokens": VISION_MAX_TOKENS,
        });

        let payload = self.post_json("/chat/completions", &body).await?;
        parse_completion(&payload)
    }

    pub async fn generate_embedding(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        if inputs.is_empty() || inputs.iter().all(|i| i.trim().is_empty()) {
            return Err(ApiError::BadRequest("Message cannot be empty.".to_string()));
        }

        let body = json!({
            "input": inputs,
            "model": self.embedding_model,
        });
        let payload = self.post_json("/embeddings", &body).await?;

        let data = payload["data"].as_array().ok_or_else(|| {
            ApiError::Upstream(format!("Missing keys in response: {}", payload))
        })?;

        let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
        for (position, item) in data.iter().enumerate() {
            let index = item["index"].as_u64().map(|i| i as usize).unwrap_or(position);
            let vector = item["embedding"]
                .as_array()
                .ok_or_else(|| ApiError::Upstream("Embedding item without vector".to_string()))?
                .iter()
                .map(|v| {
                    v.as_f64().map(|f| f as f32).ok_or_else(|| {
                        ApiError::Upstream(format!(
                            "Non-numeric value in embedding {}: {}",
                            index, v
                        ))
                    })
                })
                .collect::<Result<Vec<f32>, ApiError>>()?;
            indexed.push((index, vector));
        }
        indexed.sort_by_key(|(index, _)| *index);

        if indexed.len() != inputs.len() {
            return Err(ApiError::Upstream(format!(
                "Expected {} embeddings, got {}",
                inputs.len(),
                indexed.len()
            )));
        }

        Ok(indexed.into_iter().map(|(_, vector)| vector).collect())
    }
}

#[async_trait]
impl LlmProvider for OpenAiConnector {
    fn name(&self) -> &str {
        "openai"
    }

    fn default_chat_model(&self) -> Option<&str> {
        Some(
            self.available_models
                .first()
                .map(String::as_str)
                .unwrap_or(DEFAULT_CHAT_MODEL),
        )
    }

    async fn health_check(&self) -> Result<bool, ApiError> {
        match self.request(Method::GET, "/models").send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    async fn list_models(&self) -> Result<Vec<ProviderModel>, ApiError> {
        let res = self
            .request(Method::GET, "/models")
            .send()
            .await
            .map_err(ApiError::upstream)?;

        if !res.status().is_success() {
            return Err(ApiError::Upstream(format!(
                "Failed to list models: {}",
                res.status()
            )));
        }

        let response: ModelsResponse = res.json().await.map_err(ApiError::upstream)?;
        Ok(response
            .data
            .into_iter()
            .map(|m| ProviderModel {
                id: m.id,
                owned_by: m.owned_by,
            })
            .collect())
    }

    async fn chat(&self, request: ChatRequest, model_id: &str) -> Result<ChatCompletion, ApiError> {
        self.check_model(model_id)?;

        let mut body = json!({
            "model": model_id,
            "messages": request.messages,
        });

        if let Some(obj) = body.as_object_mut() {
            if let Some(t) = request.temperature { obj.insert("temperature".to_string(), json!(t)); }
            if let Some(t) = request.max_tokens { obj.insert("max_tokens".to_string(), json!(t)); }
            if let Some(s) = request.stop { obj.insert("stop".to_string(), json!(s)); }
        }

        let payload = self.post_json("/chat/completions", &body).await?;
        parse_completion(&payload)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiConnector {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.embedding_model
    }

    fn dimension(&self) -> Option<usize> {
        None
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        self.generate_embedding(inputs).await
    }
}

fn parse_completion(payload: &Value) -> Result<ChatCompletion, ApiError> {
    let content = payload["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| ApiError::Upstream(format!("Missing keys in response: {}", payload)))?
        .to_string();

    let usage = payload.get("usage").map(|u| TokenUsage {
        prompt_tokens: u["prompt_tokens"].as_u64().unwrap_or(0),
        completion_tokens: u["completion_tokens"].as_u64().unwrap_or(0),
    });

    Ok(ChatCompletion { content, usage })
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
