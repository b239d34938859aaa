use serde_json::{Map, Value};

use crate::core::errors::ApiError;

pub fn validate_config(config: &Value) -> Result<(), ApiError> {
    let root = config
        .as_object()
        .ok_or_else(|| config_type_error("root", "object"))?;

    if let Some(server) = expect_optional_object(root, "server")? {
        validate_optional_string_field(server, "server.host", "host")?;
        validate_u64_field(server, "server.port", "port", 1, 65_535)?;
        validate_string_array_field(server, "server.allowed_origins", "allowed_origins")?;
    }

    if let Some(rag) = expect_optional_object(root, "rag")? {
        validate_u64_field(rag, "rag.chunk_size", "chunk_size", 1, 1_000_000)?;
        validate_u64_field(rag, "rag.chunk_overlap", "chunk_overlap", 0, 1_000_000)?;
        validate_u64_field(rag, "rag.top_k", "top_k", 1, 1_000)?;
        validate_u64_field(
            rag,
            "rag.max_context_length",
            "max_context_length",
            1,
            10_000_000,
        )?;
        validate_u64_field(
            rag,
            "rag.embedding_batch_size",
            "embedding_batch_size",
            1,
            4_096,
        )?;
        validate_number_field(rag, "rag.similarity_threshold", "similarity_threshold")?;
        validate_optional_string_field(rag, "rag.embedding_provider", "embedding_provider")?;

        let chunk_size = rag.get("chunk_size").and_then(Value::as_u64).unwrap_or(500);
        let chunk_overlap = rag.get("chunk_overlap").and_then(Value::as_u64).unwrap_or(50);
        if chunk_overlap >= chunk_size {
            return Err(ApiError::BadRequest(format!(
                "Invalid config at 'rag.chunk_overlap': must be smaller than chunk_size ({})",
                chunk_size
            )));
        }
    }

    if let Some(agent) = expect_optional_object(root, "agent")? {
        validate_u64_field(agent, "agent.max_steps", "max_steps", 1, 50)?;
        validate_u64_field(agent, "agent.max_tokens", "max_tokens", 1, 1_000_000)?;
        validate_u64_field(agent, "agent.history_window", "history_window", 0, 1_000)?;
        validate_number_field(agent, "agent.temperature", "temperature")?;
        validate_optional_string_field(agent, "agent.chat_provider", "chat_provider")?;
        validate_optional_string_field(agent, "agent.chat_model", "chat_model")?;
        validate_optional_string_field(agent, "agent.default_mode", "default_mode")?;

        if let Some(policy) = expect_optional_object(agent, "tool_policy")? {
            for key in ["allowed_tools", "allow", "denied_tools", "deny"] {
                validate_string_array_field(policy, &format!("agent.tool_policy.{}", key), key)?;
            }
        }
    }

    if let Some(ingest) = expect_optional_object(root, "ingest")? {
        validate_u64_field(
            ingest,
            "ingest.download_timeout_secs",
            "download_timeout_secs",
            1,
            86_400,
        )?;
        validate_u64_field(
            ingest,
            "ingest.max_download_bytes",
            "max_download_bytes",
            1,
            1_000_000_000,
        )?;
    }

    if let Some(connectors) = expect_optional_object(root, "connector")? {
        for (name, value) in connectors {
            let path_prefix = format!("connector.{}", name);
            let entry = value
                .as_object()
                .ok_or_else(|| config_type_error(&path_prefix, "object"))?;
            validate_optional_string_field(entry, &format!("{}.base_url", path_prefix), "base_url")?;
        }
        if let Some(openai) = expect_optional_object(connectors, "openai")? {
            validate_bool_field(openai, "connector.openai.use_organization_id", "use_organization_id")?;
            validate_string_array_field(openai, "connector.openai.model", "model")?;
        }
        if let Some(hf) = expect_optional_object(connectors, "huggingface")? {
            if let Some(models) = expect_optional_object(hf, "model")? {
                for (alias, spec) in models {
                    let path_prefix = format!("connector.huggingface.model.{}", alias);
                    let spec = spec
                        .as_object()
                        .ok_or_else(|| config_type_error(&path_prefix, "object"))?;
                    validate_optional_string_field(spec, &format!("{}.name", path_prefix), "name")?;
                    validate_u64_field(spec, &format!("{}.dim_size", path_prefix), "dim_size", 1, 65_536)?;
                }
            }
        }
    }

    Ok(())
}

fn validate_number_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.as_f64().is_some() {
        return Ok(());
    }
    Err(config_type_error(path, "number"))
}

fn expect_optional_object<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>, ApiError> {
    match root.get(key) {
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(config_type_error(key, "object")),
        None => Ok(None),
    }
}

fn validate_bool_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.as_bool().is_some() {
        return Ok(());
    }
    Err(config_type_error(path, "boolean"))
}

fn validate_u64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: u64,
    max: u64,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_u64() else {
        return Err(config_type_error(path, "integer"));
    };
    if number < min || number > max {
        return Err(ApiError::BadRequest(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_optional_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.as_str().is_none() {
        return Err(config_type_error(path, "string"));
    }
    Ok(())
}

fn validate_string_array_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(items) = value.as_array() else {
        return Err(config_type_error(path, "array of strings"));
    };
    for (index, item) in items.iter().enumerate() {
        let Some(text) = item.as_str() else {
            return Err(config_type_error(&format!("{}[{}]", path, index), "string"));
        };
        if text.trim().is_empty() {
            return Err(ApiError::BadRequest(format!(
                "Invalid config at '{}[{}]': value cannot be empty",
                path, index
            )));
        }
    }
    Ok(())
}

fn config_type_error(path: &str, expected: &str) -> ApiError {
    ApiError::BadRequest(format!(
        "Invalid config at '{}': expected {}",
        path, expected
    ))
}
