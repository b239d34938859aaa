use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::core::config::settings::{HfModelSpec, HuggingFaceSettings};
use crate::core::errors::ApiError;
use crate::llm::provider::{EmbeddingProvider, LlmProvider};
use crate::llm::types::{ChatCompletion, ChatMessage, ChatRequest, ProviderModel};

#[derive(Clone)]
pub struct HuggingFaceConnector {
    base_url: String,
    api_key: String,
    supported_models: BTreeMap<String, HfModelSpec>,
    embedding_model: Option<HfModelSpec>,
    chat_model: Option<String>,
    client: Client,
}

impl fmt::Debug for HuggingFaceConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HuggingFaceConnector")
            .field("base_url", &self.base_url)
            .field("embedding_model", &self.embedding_model)
            .field("chat_model", &self.chat_model)
            .finish_non_exhaustive()
    }
}

impl HuggingFaceConnector {
    pub fn from_settings(settings: &HuggingFaceSettings) -> Result<Self, ApiError> {
        let api_key = settings
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                ApiError::NotConfigured(
                    "Missing key in settings: connector.huggingface.api_key".to_string(),
                )
            })?
            .to_string();

        let embedding_model = match settings.embedding_model.as_deref() {
            Some(requested) => Some(
                resolve_model(&settings.model, requested)
                    .cloned()
                    .ok_or_else(|| {
                        ApiError::BadRequest(format!(
                            "Model not supported. Currently supported models: {:?}",
                            supported_names(&settings.model)
                        ))
                    })?,
            ),
            None if settings.model.len() == 1 => settings.model.values().next().cloned(),
            None => None,
        };

        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key,
            supported_models: settings.model.clone(),
            embedding_model,
            chat_model: settings.chat_model.clone(),
            client: Client::new(),
        })
    }

    pub fn embedding_model(&self) -> Option<&HfModelSpec> {
        self.embedding_model.as_ref()
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(ApiError::upstream)?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "HuggingFace {} error ({}): {}",
                path, status, text
            )));
        }

        let payload: Value = res.json().await.map_err(ApiError::upstream)?;
        if let Some(error) = payload.get("error").and_then(|e| e.as_str()) {
            return Err(ApiError::Upstream(format!("HuggingFace error: {}", error)));
        }
        Ok(payload)
    }
}

#[async_trait]
impl LlmProvider for HuggingFaceConnector {
    fn name(&self) -> &str {
        "huggingface"
    }

    fn default_chat_model(&self) -> Option<&str> {
        self.chat_model.as_deref()
    }

    async fn health_check(&self) -> Result<bool, ApiError> {
        let Some(model) = self
            .embedding_model
            .as_ref()
            .map(|m| m.name.clone())
            .or_else(|| self.chat_model.clone())
        else {
            return Ok(false);
        };

        let url = format!("{}/status/{}", self.base_url, model);
        match self.client.get(&url).bearer_auth(&self.api_key).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    async fn list_models(&self) -> Result<Vec<ProviderModel>, ApiError> {
        let mut models: Vec<ProviderModel> = self
            .supported_models
            .values()
            .map(|spec| ProviderModel {
                id: spec.name.clone(),
                owned_by: Some("huggingface".to_string()),
            })
            .collect();
        if let Some(chat) = &self.chat_model {
            if !models.iter().any(|m| &m.id == chat) {
                models.push(ProviderModel {
                    id: chat.clone(),
                    owned_by: Some("huggingface".to_string()),
                });
            }
        }
        Ok(models)
    }

    async fn chat(&self, request: ChatRequest, model_id: &str) -> Result<ChatCompletion, ApiError> {
        let prompt = flatten_prompt(&request.messages);

        let mut parameters = json!({ "return_full_text": false });
        if let Some(obj) = parameters.as_object_mut() {
            if let Some(t) = request.temperature { obj.insert("temperature".to_string(), json!(t)); }
            if let Some(t) = request.max_tokens { obj.insert("max_new_tokens".to_string(), json!(t)); }
            if let Some(s) = request.stop { obj.insert("stop".to_string(), json!(s)); }
        }

        let body = json!({
            "inputs": prompt,
            "parameters": parameters,
            "options": { "wait_for_model": true },
        });
        let payload = self.post_json(&format!("/models/{}", model_id), &body).await?;

        let generated = payload
            .get(0)
            .and_then(|item| item.get("generated_text"))
            .or_else(|| payload.get("generated_text"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| ApiError::Upstream(format!("Missing generated_text: {}", payload)))?;

        Ok(ChatCompletion::text(generated.trim()))
    }
}

#[async_trait]
impl EmbeddingProvider for HuggingFaceConnector {
    fn name(&self) -> &str {
        "huggingface"
    }

    fn model(&self) -> &str {
        self.embedding_model
            .as_ref()
            .map(|m| m.name.as_str())
            .unwrap_or("")
    }

    fn dimension(&self) -> Option<usize> {
        self.embedding_model.as_ref().map(|m| m.dim_size)
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        let spec = self.embedding_model.as_ref().ok_or_else(|| {
            ApiError::NotConfigured(
                "connector.huggingface.embedding_model is not set".to_string(),
            )
        })?;
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let body = json!({
            "inputs": inputs,
            "options": { "wait_for_model": true },
        });
        let payload = self
            .post_json(&format!("/pipeline/feature-extraction/{}", spec.name), &body)
            .await?;

        let rows = payload
            .as_array()
            .ok_or_else(|| ApiError::Upstream(format!("Unexpected embedding payload: {}", payload)))?;
        if rows.len() != inputs.len() {
            return Err(ApiError::Upstream(format!(
                "Expected {} embeddings, got {}",
                inputs.len(),
                rows.len()
            )));
        }

        rows.iter()
            .map(|row| {
                let vector = pool_embedding(row)?;
                if vector.len() != spec.dim_size {
                    return Err(ApiError::Upstream(format!(
                        "Model {} returned {} dimensions, expected {}",
                        spec.name,
                        vector.len(),
                        spec.dim_size
                    )));
                }
                Ok(vector)
            })
            .collect()
    }
}

fn resolve_model<'a>(
    models: &'a BTreeMap<String, HfModelSpec>,
    requested: &str,
) -> Option<&'a HfModelSpec> {
    models
        .get(requested)
        .or_else(|| models.values().find(|spec| spec.name == requested))
}

fn supported_names(models: &BTreeMap<String, HfModelSpec>) -> Vec<String> {
    models.values().map(|spec| spec.name.clone()).collect()
}

/// Sentence models return one vector; token-level models return one per
/// token, which are mean-pooled.
fn pool_embedding(row: &Value) -> Result<Vec<f32>, ApiError> {
    let items = row
        .as_array()
        .ok_or_else(|| ApiError::Upstream("Embedding row is not an array".to_string()))?;

    if items.first().map(|v| v.is_array()).unwrap_or(false) {
        let tokens: Vec<Vec<f32>> = items.iter().map(pool_embedding).collect::<Result<_, _>>()?;
        let width = tokens.first().map(Vec::len).unwrap_or(0);
        let mut pooled = vec![0.0f32; width];
        for token in &tokens {
            for (acc, v) in pooled.iter_mut().zip(token) {
                *acc += v;
            }
        }
        let n = tokens.len().max(1) as f32;
        return Ok(pooled.into_iter().map(|v| v / n).collect());
    }

    Ok(items
        .iter()
        .filter_map(|v| v.as_f64().map(|f| f as f32))
        .collect())
}

fn flatten_prompt(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    for message in messages {
        let label = match message.role.as_str() {
            "system" => "System",
            "assistant" => "Assistant",
            _ => "User",
        };
        prompt.push_str(label);
        prompt.push_str(": ");
        prompt.push_str(&message.content);
        prompt.push('\n');
    }
    prompt.push_str("Assistant:");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn settings(base_url: String) -> HuggingFaceSettings {
        let mut model = BTreeMap::new();
        model.insert(
            "mini".to_string(),
            HfModelSpec {
                name: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
                dim_size: 3,
            },
        );
        HuggingFaceSettings {
            api_key: Some("hf_test".to_string()),
            base_url,
            model,
            embedding_model: Some("mini".to_string()),
            chat_model: Some("mistralai/Mistral-7B-Instruct-v0.2".to_string()),
        }
    }

    #[test]
    fn unsupported_embedding_model_lists_supported_ones() {
        let mut cfg = settings("http://unused".into());
        cfg.embedding_model = Some("bert-base".to_string());
        let err = HuggingFaceConnector::from_settings(&cfg).unwrap_err();
        assert!(err.to_string().contains("all-MiniLM-L6-v2"));
    }

    #[test]
    fn embedding_model_resolves_by_alias_or_name() {
        let mut cfg = settings("http://unused".into());
        cfg.embedding_model = Some("sentence-transformers/all-MiniLM-L6-v2".to_string());
        let connector = HuggingFaceConnector::from_settings(&cfg).unwrap();
        assert_eq!(connector.embedding_model().unwrap().dim_size, 3);
    }

    #[test]
    fn prompt_is_flattened_with_role_labels() {
        let prompt = flatten_prompt(&[ChatMessage::system("Be brief."), ChatMessage::user("Hi")]);
        assert_eq!(prompt, "System: Be brief.\nUser: Hi\nAssistant:");
    }

    #[tokio::test]
    async fn embed_checks_dimensions() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/pipeline/feature-extraction/sentence-transformers/all-MiniLM-L6-v2")
                    .header("authorization", "Bearer hf_test");
                then.status(200).json_body(json!([[0.1, 0.2, 0.3], [0.4, 0.5]]));
            })
            .await;

        let connector = HuggingFaceConnector::from_settings(&settings(server.base_url())).unwrap();
        let err = connector
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expected 3"));
    }

    #[tokio::test]
    async fn embed_mean_pools_token_vectors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/pipeline/feature-extraction/sentence-transformers/all-MiniLM-L6-v2");
                then.status(200)
                    .json_body(json!([[[1.0, 0.0, 2.0], [3.0, 2.0, 0.0]]]));
            })
            .await;

        let connector = HuggingFaceConnector::from_settings(&settings(server.base_url())).unwrap();
        let vectors = connector.embed(&["tokens".to_string()]).await.unwrap();
        assert_eq!(vectors, vec![vec![2.0, 1.0, 1.0]]);
    }

    #[tokio::test]
    async fn chat_returns_generated_text() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/models/mistralai/Mistral-7B-Instruct-v0.2")
                    .body_contains("User: Hello");
                then.status(200)
                    .json_body(json!([{ "generated_text": " Hi there " }]));
            })
            .await;

        let connector = HuggingFaceConnector::from_settings(&settings(server.base_url())).unwrap();
        let completion = connector
            .chat(
                ChatRequest::new(vec![ChatMessage::user("Hello")]),
                "mistralai/Mistral-7B-Instruct-v0.2",
            )
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(completion.content, "Hi there");
    }

    #[tokio::test]
    async fn error_payloads_become_upstream_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/models/m");
                then.status(200).json_body(json!({ "error": "Model m is currently loading" }));
            })
            .await;

        let connector = HuggingFaceConnector::from_settings(&settings(server.base_url())).unwrap();
        let err = connector
            .chat(ChatRequest::new(vec![ChatMessage::user("x")]), "m")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Upstream(ref msg) if msg.contains("loading")));
    }
}
