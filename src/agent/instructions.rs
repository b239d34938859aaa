use crate::rag::BuiltContext;
use crate::tools::ToolSpec;

pub const DIRECT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Answer clearly and concisely.";

pub const STEP_LIMIT_PROMPT: &str = "You have reached the tool step limit. \
Reply now with your best final answer as plain text, using the observations above. Do not call any tool.";

pub fn build_agent_instructions(tools: &[ToolSpec]) -> String {
    let tools_text = if tools.is_empty() {
        "None. Answer without tools.".to_string()
    } else {
        tools
            .iter()
            .map(|tool| format!("- {}: {}\n  parameters: {}", tool.name, tool.description, tool.parameters))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "You are an assistant that can use tools to answer the user.\n\
Available tools:\n\
{tools_text}\n\n\
Respond with exactly one JSON object per turn and nothing else.\n\
To call a tool:\n\
{{\"action\": \"<tool name>\", \"input\": {{...arguments...}}}}\n\
When you know the answer:\n\
{{\"final_answer\": \"...\"}}\n\
Tool results arrive as messages starting with \"Observation:\"."
    )
}

pub fn build_rag_prompt(context: &BuiltContext) -> String {
    if context.is_empty() {
        return "You are a helpful assistant answering from a document collection. \
No documents matched the user's question. Say so briefly, then answer from general knowledge if you can."
            .to_string();
    }

    format!(
        "You are a helpful assistant answering from the documents below.\n\
Use only this context. Cite passages by their number, e.g. [1]. \
If the context does not contain the answer, say that you don't know.\n\n\
Context:\n{}",
        context.text
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn agent_instructions_list_tools_and_protocol() {
        let text = build_agent_instructions(&[ToolSpec {
            name: "search_documents".to_string(),
            description: "Search.".to_string(),
            parameters: json!({ "type": "object" }),
        }]);
        assert!(text.contains("- search_documents: Search."));
        assert!(text.contains("\"final_answer\""));
    }

    #[test]
    fn rag_prompt_embeds_context_or_notes_absence() {
        let context = BuiltContext {
            text: "[1] (a.md)\nCats purr.".to_string(),
            sources: vec!["a.md".to_string()],
        };
        assert!(build_rag_prompt(&context).ends_with("Context:\n[1] (a.md)\nCats purr."));
        assert!(build_rag_prompt(&BuiltContext::default()).contains("No documents matched"));
    }
}
