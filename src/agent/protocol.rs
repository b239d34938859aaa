//! Parsing of the model's one-JSON-object-per-turn replies.

use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum AgentDecision {
    Final(String),
    Action { tool: String, input: Value },
}

/// Reads the first JSON object carrying an action or final answer. Replies
/// without one are taken as the final answer verbatim.
pub fn parse_agent_decision(text: &str) -> AgentDecision {
    for candidate in json_objects(text) {
        if let Some(decision) = parse_decision_from_value(&candidate) {
            return decision;
        }
    }
    AgentDecision::Final(strip_code_fence(text).to_string())
}

fn parse_decision_from_value(value: &Value) -> Option<AgentDecision> {
    let object = value.as_object()?;

    if let Some(answer) = object.get("final_answer") {
        let content = match answer {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Some(AgentDecision::Final(content));
    }

    let tool = object
        .get("action")
        .or_else(|| object.get("tool"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())?;

    let input = match object.get("input").or_else(|| object.get("args")) {
        Some(Value::String(raw)) => serde_json::from_str::<Value>(raw)
            .ok()
            .filter(Value::is_object)
            .unwrap_or_else(|| Value::String(raw.clone())),
        Some(Value::Null) | None => Value::Object(Map::new()),
        Some(other) => other.clone(),
    };

    Some(AgentDecision::Action {
        tool: tool.to_string(),
        input,
    })
}

/// Balanced `{...}` spans that parse as JSON, in order of appearance.
fn json_objects(text: &str) -> Vec<Value> {
    let bytes = text.as_bytes();
    let mut found = Vec::new();
    let mut start = 0usize;

    while let Some(offset) = text[start..].find('{') {
        let open = start + offset;
        match balanced_end(bytes, open) {
            Some(close) => match serde_json::from_str::<Value>(&text[open..=close]) {
                Ok(value) => {
                    found.push(value);
                    start = close + 1;
                }
                Err(_) => start = open + 1,
            },
            None => start = open + 1,
        }
    }

    found
}

fn balanced_end(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &byte) in bytes.iter().enumerate().skip(open) {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    body.strip_suffix("```").unwrap_or(body).trim()
}
