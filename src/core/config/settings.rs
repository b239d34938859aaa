//! Typed view over the merged YAML configuration.
//!
//! Every section falls back to its defaults, so an empty `config.yml` still
//! yields a runnable (if provider-less) service.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::errors::ApiError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub rag: RagSettings,
    pub agent: AgentSettings,
    pub ingest: IngestSettings,
    pub connector: ConnectorSettings,
}

impl Settings {
    pub fn from_value(value: &Value) -> Result<Self, ApiError> {
        serde_json::from_value(value.clone())
            .map_err(|err| ApiError::BadRequest(format!("Invalid config: {}", err)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
            allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub similarity_threshold: f32,
    pub max_context_length: usize,
    /// `openai` or `huggingface`.
    pub embedding_provider: String,
    pub embedding_batch_size: usize,
    pub default_collection: String,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
            top_k: 5,
            similarity_threshold: 0.2,
            max_context_length: 4000,
            embedding_provider: "openai".to_string(),
            embedding_batch_size: 32,
            default_collection: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub max_steps: usize,
    pub chat_provider: String,
    /// Unset means the provider's own default chat model.
    pub chat_model: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub default_mode: String,
    pub history_window: usize,
    pub tool_policy: Value,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_steps: 6,
            chat_provider: "openai".to_string(),
            chat_model: None,
            temperature: 0.4,
            max_tokens: 300,
            default_mode: "rag".to_string(),
            history_window: 10,
            tool_policy: Value::Null,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    pub download_timeout_secs: u64,
    pub max_download_bytes: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            download_timeout_secs: 30,
            max_download_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorSettings {
    pub openai: Option<OpenAiSettings>,
    pub huggingface: Option<HuggingFaceSettings>,
    pub renderform: Option<RenderFormSettings>,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    pub api_key: Option<String>,
    pub organization_id: Option<String>,
    pub use_organization_id: bool,
    /// Chat models this deployment may call. Empty means any.
    pub model: Vec<String>,
    pub embedding_model: String,
    pub base_url: String,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            organization_id: None,
            use_organization_id: true,
            model: Vec::new(),
            embedding_model: "text-embedding-ada-002".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }
}

impl std::fmt::Debug for OpenAiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiSettings")
            .field("use_organization_id", &self.use_organization_id)
            .field("model", &self.model)
            .field("embedding_model", &self.embedding_model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HfModelSpec {
    pub name: String,
    pub dim_size: usize,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HuggingFaceSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    /// Supported models keyed by alias.
    pub model: BTreeMap<String, HfModelSpec>,
    /// Alias or full name of the embedding model.
    pub embedding_model: Option<String>,
    pub chat_model: Option<String>,
}

impl Default for HuggingFaceSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api-inference.huggingface.co".to_string(),
            model: BTreeMap::new(),
            embedding_model: None,
            chat_model: None,
        }
    }
}

impl std::fmt::Debug for HuggingFaceSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HuggingFaceSettings")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("embedding_model", &self.embedding_model)
            .field("chat_model", &self.chat_model)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderFormSettings {
    #[serde(rename = "x-api-key")]
    pub api_key: Option<String>,
    pub base_url: String,
    pub api_version: String,
}

impl Default for RenderFormSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.renderform.io/api".to_string(),
            api_version: "v2".to_string(),
        }
    }
}

impl std::fmt::Debug for RenderFormSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderFormSettings")
            .field("base_url", &self.base_url)
            .field("api_version", &self.api_version)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_config_uses_defaults() {
        let settings = Settings::from_value(&json!({})).unwrap();
        assert_eq!(settings.rag.chunk_size, 500);
        assert!(settings.agent.chat_model.is_none());
        assert!(settings.connector.openai.is_none());
    }

    #[test]
    fn parses_connector_sections() {
        let settings = Settings::from_value(&json!({
            "connector": {
                "huggingface": {
                    "api_key": "hf_x",
                    "model": { "mini": { "name": "sentence-transformers/all-MiniLM-L6-v2", "dim_size": 384 } },
                    "embedding_model": "mini"
                },
                "renderform": { "x-api-key": "rf" }
            }
        }))
        .unwrap();

        let hf = settings.connector.huggingface.unwrap();
        assert_eq!(hf.model["mini"].dim_size, 384);
        assert_eq!(hf.base_url, "https://api-inference.huggingface.co");
        let rf = settings.connector.renderform.unwrap();
        assert_eq!(rf.api_key.as_deref(), Some("rf"));
        assert_eq!(rf.api_version, "v2");
    }

    #[test]
    fn debug_output_hides_keys() {
        let settings = OpenAiSettings {
            api_key: Some("sk-secret".to_string()),
            ..Default::default()
        };
        assert!(!format!("{:?}", settings).contains("sk-secret"));
    }
}
