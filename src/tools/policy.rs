use std::collections::HashSet;

use serde_json::Value;

/// Allow/deny lists from `agent.tool_policy`. Deny wins over allow.
#[derive(Debug, Clone)]
pub struct ToolPolicy {
    pub allow_all: bool,
    pub allowed_tools: HashSet<String>,
    pub denied_tools: HashSet<String>,
}

impl Default for ToolPolicy {
    fn default() -> Self {
        Self::allow_all_policy()
    }
}

impl ToolPolicy {
    pub fn allow_all_policy() -> Self {
        Self {
            allow_all: true,
            allowed_tools: HashSet::new(),
            denied_tools: HashSet::new(),
        }
    }

    /// Accepts `{allowed_tools | allow, denied_tools | deny}`; a missing
    /// allow list or `"*"` allows everything not denied.
    pub fn from_value(policy: &Value) -> Self {
        let policy = policy.as_object().cloned().unwrap_or_default();

        let allow_defined = policy.contains_key("allowed_tools") || policy.contains_key("allow");
        let allowed_raw =
            parse_string_set(policy.get("allowed_tools").or_else(|| policy.get("allow")));
        let allow_all = !allow_defined || allowed_raw.contains("*");

        let allowed_tools = allowed_raw
            .into_iter()
            .filter(|tool| tool != "*")
            .collect::<HashSet<_>>();
        let denied_tools =
            parse_string_set(policy.get("denied_tools").or_else(|| policy.get("deny")));

        Self {
            allow_all,
            allowed_tools,
            denied_tools,
        }
    }

    pub fn is_tool_allowed(&self, tool_name: &str) -> bool {
        if self.denied_tools.contains(tool_name) {
            return false;
        }
        if self.allow_all {
            return true;
        }
        self.allowed_tools.contains(tool_name)
    }
}

fn parse_string_set(value: Option<&Value>) -> HashSet<String> {
    let mut out = HashSet::new();
    let Some(list) = value.and_then(|v| v.as_array()) else {
        return out;
    };
    for item in list {
        if let Some(value) = item.as_str().map(str::trim).filter(|v| !v.is_empty()) {
            out.insert(value.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_policy_allows_everything() {
        let policy = ToolPolicy::from_value(&Value::Null);
        assert!(policy.is_tool_allowed("delete_record"));
    }

    #[test]
    fn allow_list_and_deny_precedence() {
        let policy = ToolPolicy::from_value(&json!({
            "allow": ["search_documents", "delete_record"],
            "denied_tools": ["delete_record"],
        }));
        assert!(policy.is_tool_allowed("search_documents"));
        assert!(!policy.is_tool_allowed("delete_record"));
        assert!(!policy.is_tool_allowed("create_record"));

        let wildcard = ToolPolicy::from_value(&json!({ "allowed_tools": ["*"], "deny": ["render_image"] }));
        assert!(wildcard.is_tool_allowed("create_record"));
        assert!(!wildcard.is_tool_allowed("render_image"));
    }
}
