use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};

use super::paths::AppPaths;
use super::settings::Settings;
use super::validation::validate_config;
use crate::core::errors::ApiError;

const REDACT_PLACEHOLDER: &str = "****";

const SENSITIVE_PATTERNS: [&str; 12] = [
    "api_key",
    "api-key",
    "apikey",
    "secret",
    "password",
    "_token",
    "token_",
    "credential",
    "private_key",
    "organization_id",
    "access_key",
    "bearer",
];

const SENSITIVE_WHITELIST: [&str; 6] = [
    "use_organization_id",
    "max_tokens",
    "max_new_tokens",
    "total_tokens",
    "prompt_tokens",
    "completion_tokens",
];

#[derive(Clone)]
pub struct ConfigService {
    paths: Arc<AppPaths>,
    config_override: Option<PathBuf>,
}

impl ConfigService {
    pub fn new(paths: Arc<AppPaths>) -> Self {
        let config_override = env::var("RAG_AGENTS_CONFIG_PATH").ok().map(PathBuf::from);
        Self {
            paths,
            config_override,
        }
    }

    /// Pins the public config file, ignoring the environment override.
    pub fn with_config_path(paths: Arc<AppPaths>, config_path: PathBuf) -> Self {
        Self {
            paths,
            config_override: Some(config_path),
        }
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    pub fn config_path(&self) -> PathBuf {
        if let Some(path) = &self.config_override {
            return path.clone();
        }

        let user_config = self.paths.user_data_dir.join("config.yml");
        if user_config.exists() {
            return user_config;
        }

        self.paths.project_root.join("config.yml")
    }

    pub fn config_write_path(&self) -> PathBuf {
        if let Some(path) = &self.config_override {
            return path.clone();
        }

        self.paths.user_data_dir.join("config.yml")
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.paths.credentials_path.clone()
    }

    pub fn load_config(&self) -> Result<Value, ApiError> {
        let public_config = load_yaml_file(&self.config_path());
        let credentials = load_yaml_file(&self.credentials_path());
        Ok(deep_merge(&public_config, &credentials))
    }

    pub fn load_settings(&self) -> Result<Settings, ApiError> {
        let config = self.load_config()?;
        Settings::from_value(&config)
    }

    pub fn update_config(&self, config_data: Value, merge: bool) -> Result<(), ApiError> {
        let current = self.load_config()?;
        let restored = restore_redacted_values(&config_data, &current);
        let to_save = if merge {
            deep_merge(&current, &restored)
        } else {
            restored
        };

        validate_config(&to_save)?;
        save_config_files(self, &to_save)?;
        tracing::info!("Configuration updated (merge={})", merge);
        Ok(())
    }

    pub fn redact_sensitive_values(&self, value: &Value) -> Value {
        redact_sensitive_values(value)
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Missing, unreadable or non-mapping files count as empty.
fn load_yaml_file(path: &Path) -> Value {
    let Ok(contents) = fs::read_to_string(path) else {
        return empty_object();
    };
    match serde_yaml::from_str::<Value>(&contents) {
        Ok(value) if value.is_object() => value,
        Ok(_) => empty_object(),
        Err(err) => {
            tracing::warn!("Ignoring unparsable config {}: {}", path.display(), err);
            empty_object()
        }
    }
}

fn write_yaml_file(path: &Path, value: &Value) -> Result<(), ApiError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(ApiError::internal)?;
    }
    let text = serde_yaml::to_string(value).map_err(ApiError::internal)?;
    fs::write(path, text).map_err(ApiError::internal)
}

fn save_config_files(service: &ConfigService, config: &Value) -> Result<(), ApiError> {
    let (public_config, credentials) = split_config(config);
    write_yaml_file(&service.config_write_path(), &public_config)?;
    write_yaml_file(&service.credentials_path(), &credentials)
}

/// Objects merge key by key; any other overlay value replaces the base.
pub(crate) fn deep_merge(base: &Value, overlay: &Value) -> Value {
    let (Value::Object(base_map), Value::Object(overlay_map)) = (base, overlay) else {
        return overlay.clone();
    };
    let mut merged = base_map.clone();
    for (key, value) in overlay_map {
        let next = merged
            .get(key)
            .map(|current| deep_merge(current, value))
            .unwrap_or_else(|| value.clone());
        merged.insert(key.clone(), next);
    }
    Value::Object(merged)
}

/// Splits a config tree into (public, credentials); empty branches are dropped.
fn split_config(config: &Value) -> (Value, Value) {
    let Value::Object(map) = config else {
        return (config.clone(), empty_object());
    };

    let mut public = Map::new();
    let mut secrets = Map::new();
    for (key, value) in map {
        if value.is_object() {
            let (public_branch, secret_branch) = split_config(value);
            insert_non_empty(&mut public, key, public_branch);
            insert_non_empty(&mut secrets, key, secret_branch);
        } else if is_secret_entry(key, value) {
            secrets.insert(key.clone(), value.clone());
        } else {
            public.insert(key.clone(), value.clone());
        }
    }
    (Value::Object(public), Value::Object(secrets))
}

fn insert_non_empty(target: &mut Map<String, Value>, key: &str, value: Value) {
    if value.as_object().map_or(true, |map| !map.is_empty()) {
        target.insert(key.to_string(), value);
    }
}

fn redact_sensitive_values(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, val)| {
                    let shown = if is_secret_entry(key, val) {
                        Value::String(REDACT_PLACEHOLDER.to_string())
                    } else {
                        redact_sensitive_values(val)
                    };
                    (key.clone(), shown)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_sensitive_values).collect()),
        other => other.clone(),
    }
}

fn is_placeholder(value: &Value) -> bool {
    value.as_str() == Some(REDACT_PLACEHOLDER)
}

/// Puts stored values back wherever the client echoed the redaction placeholder.
/// A placeholder with nothing stored behind it is dropped.
fn restore_redacted_values(incoming: &Value, stored: &Value) -> Value {
    match incoming {
        Value::Object(map) => {
            let mut restored = Map::new();
            for (key, value) in map {
                let previous = stored.get(key.as_str());
                if is_placeholder(value) {
                    if let Some(previous) = previous {
                        restored.insert(key.clone(), previous.clone());
                    }
                } else {
                    let value = restore_redacted_values(value, previous.unwrap_or(&Value::Null));
                    restored.insert(key.clone(), value);
                }
            }
            Value::Object(restored)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .enumerate()
                .filter_map(|(idx, item)| {
                    let previous = stored.get(idx);
                    if is_placeholder(item) {
                        previous.cloned()
                    } else {
                        Some(restore_redacted_values(item, previous.unwrap_or(&Value::Null)))
                    }
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

fn is_secret_entry(key: &str, value: &Value) -> bool {
    !value.is_null() && is_sensitive_key(key)
}

fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_lowercase();
    !SENSITIVE_WHITELIST.contains(&key.as_str())
        && SENSITIVE_PATTERNS.iter().any(|pattern| key.contains(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service_in(dir: &Path) -> ConfigService {
        let paths = Arc::new(AppPaths::from_dirs(dir.to_path_buf(), dir.to_path_buf()));
        ConfigService::with_config_path(paths, dir.join("config.yml"))
    }

    #[test]
    fn split_config_moves_connector_credentials_aside() {
        let input = json!({
            "agent": { "max_tokens": 300 },
            "connector": {
                "openai": { "api_key": "sk-1", "organization_id": "org-1", "model": ["gpt-4"] },
                "renderform": { "x-api-key": "rf-1" }
            }
        });

        let (public_config, credentials) = split_config(&input);

        assert_eq!(
            public_config,
            json!({
                "agent": { "max_tokens": 300 },
                "connector": { "openai": { "model": ["gpt-4"] } }
            })
        );
        assert_eq!(
            credentials,
            json!({
                "connector": {
                    "openai": { "api_key": "sk-1", "organization_id": "org-1" },
                    "renderform": { "x-api-key": "rf-1" }
                }
            })
        );
    }

    #[test]
    fn redact_keeps_token_limits_visible() {
        let input = json!({
            "connector": { "huggingface": { "api_key": "hf_x" } },
            "agent": { "max_tokens": 42 }
        });

        let redacted = redact_sensitive_values(&input);

        assert_eq!(redacted["connector"]["huggingface"]["api_key"], "****");
        assert_eq!(redacted["agent"]["max_tokens"], 42);
    }

    #[test]
    fn update_config_round_trips_through_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_in(dir.path());

        service
            .update_config(
                json!({ "connector": { "openai": { "api_key": "sk-1", "use_organization_id": false } } }),
                true,
            )
            .unwrap();

        let credentials = fs::read_to_string(service.credentials_path()).unwrap();
        assert!(credentials.contains("sk-1"));
        let public_text = fs::read_to_string(service.config_path()).unwrap();
        assert!(!public_text.contains("sk-1"));

        // A redacted placeholder sent back must not overwrite the stored key.
        service
            .update_config(json!({ "connector": { "openai": { "api_key": "****" } } }), true)
            .unwrap();
        let loaded = service.load_config().unwrap();
        assert_eq!(loaded["connector"]["openai"]["api_key"], "sk-1");
        assert_eq!(loaded["connector"]["openai"]["use_organization_id"], false);
    }

    #[test]
    fn invalid_update_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_in(dir.path());

        let err = service
            .update_config(json!({ "rag": { "chunk_size": 10, "chunk_overlap": 20 } }), true)
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
