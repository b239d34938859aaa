use serde::Serialize;

use crate::core::errors::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Plain model call with the session history.
    Direct,
    /// Retrieve from the knowledge base, then answer from that context.
    Rag,
    /// Tool loop.
    Agent,
}

impl AgentMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "direct" | "chat" => Some(AgentMode::Direct),
            "rag" => Some(AgentMode::Rag),
            "agent" | "tools" => Some(AgentMode::Agent),
            _ => None,
        }
    }

    /// The requested mode, or `default_mode` when none was given.
    pub fn resolve(requested: Option<&str>, default_mode: &str) -> Result<Self, ApiError> {
        match requested.map(str::trim).filter(|v| !v.is_empty()) {
            Some(value) => Self::parse(value).ok_or_else(|| {
                ApiError::BadRequest(format!(
                    "Unknown mode '{}'. Expected one of: direct, rag, agent",
                    value
                ))
            }),
            None => Ok(Self::parse(default_mode).unwrap_or_else(|| {
                tracing::warn!("Invalid agent.default_mode '{}', using rag", default_mode);
                AgentMode::Rag
            })),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AgentMode::Direct => "direct",
            AgentMode::Rag => "rag",
            AgentMode::Agent => "agent",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aliases_case_insensitively() {
        assert_eq!(AgentMode::parse(" Chat "), Some(AgentMode::Direct));
        assert_eq!(AgentMode::parse("TOOLS"), Some(AgentMode::Agent));
        assert_eq!(AgentMode::parse("rag"), Some(AgentMode::Rag));
        assert_eq!(AgentMode::parse("planner"), None);
    }

    #[test]
    fn resolves_default_and_rejects_unknown() {
        assert_eq!(AgentMode::resolve(None, "agent").unwrap(), AgentMode::Agent);
        assert_eq!(AgentMode::resolve(Some(""), "bogus").unwrap(), AgentMode::Rag);
        assert_eq!(AgentMode::resolve(Some("direct"), "agent").unwrap(), AgentMode::Direct);
        assert!(matches!(
            AgentMode::resolve(Some("high"), "rag"),
            Err(ApiError::BadRequest(_))
        ));
    }
}
