use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::instructions::{
    build_agent_instructions, build_rag_prompt, DIRECT_SYSTEM_PROMPT, STEP_LIMIT_PROMPT,
};
use super::modes::AgentMode;
use super::protocol::{parse_agent_decision, AgentDecision};
use crate::core::config::Settings;
use crate::core::errors::ApiError;
use crate::llm::{ChatMessage, ChatRequest, LlmService};
use crate::rag::{ContextBuilder, KnowledgeBase};
use crate::tools::{ToolPolicy, ToolRegistry};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentStep {
    pub tool: String,
    pub input: Value,
    pub output: String,
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentOutcome {
    pub answer: String,
    pub mode: AgentMode,
    pub steps: Vec<AgentStep>,
    pub sources: Vec<String>,
    /// False when the tool loop hit `agent.max_steps` before a final answer.
    pub finished: bool,
}

impl AgentOutcome {
    fn answered(answer: String, mode: AgentMode, sources: Vec<String>) -> Self {
        Self {
            answer,
            mode,
            steps: Vec::new(),
            sources,
            finished: true,
        }
    }
}

/// Runs one user turn in the requested mode.
#[derive(Clone)]
pub struct AgentRunner {
    llm: LlmService,
    tools: ToolRegistry,
    knowledge: Option<Arc<KnowledgeBase>>,
}

impl AgentRunner {
    pub fn new(
        llm: LlmService,
        tools: ToolRegistry,
        knowledge: Option<Arc<KnowledgeBase>>,
    ) -> Self {
        Self {
            llm,
            tools,
            knowledge,
        }
    }

    /// `history` holds prior session messages, oldest first.
    pub async fn run(
        &self,
        settings: &Settings,
        mode: AgentMode,
        history: Vec<ChatMessage>,
        message: &str,
        collection: Option<&str>,
    ) -> Result<AgentOutcome, ApiError> {
        if message.trim().is_empty() {
            return Err(ApiError::BadRequest("Message cannot be empty".to_string()));
        }

        tracing::info!("Running {} turn ({} history messages)", mode.as_str(), history.len());
        match mode {
            AgentMode::Direct => self.run_direct(settings, history, message).await,
            AgentMode::Rag => self.run_rag(settings, history, message, collection).await,
            AgentMode::Agent => self.run_agent(settings, history, message).await,
        }
    }

    async fn run_direct(
        &self,
        settings: &Settings,
        history: Vec<ChatMessage>,
        message: &str,
    ) -> Result<AgentOutcome, ApiError> {
        let messages = compose(DIRECT_SYSTEM_PROMPT.to_string(), history, message);
        let completion = self.llm.chat(&settings.agent, ChatRequest::new(messages)).await?;
        Ok(AgentOutcome::answered(
            completion.content.trim().to_string(),
            AgentMode::Direct,
            Vec::new(),
        ))
    }

    async fn run_rag(
        &self,
        settings: &Settings,
        history: Vec<ChatMessage>,
        message: &str,
        collection: Option<&str>,
    ) -> Result<AgentOutcome, ApiError> {
        let knowledge = self.knowledge.as_ref().ok_or_else(|| {
            ApiError::NotConfigured("rag mode needs an embedding provider".to_string())
        })?;

        let results = knowledge.retrieve(message, None, collection).await?;
        let context = ContextBuilder::new(settings.rag.max_context_length).build(&results);
        tracing::debug!(
            "rag context: {} results, {} sources",
            results.len(),
            context.sources.len()
        );

        let messages = compose(build_rag_prompt(&context), history, message);
        let completion = self.llm.chat(&settings.agent, ChatRequest::new(messages)).await?;
        Ok(AgentOutcome::answered(
            completion.content.trim().to_string(),
            AgentMode::Rag,
            context.sources,
        ))
    }

    async fn run_agent(
        &self,
        settings: &Settings,
        history: Vec<ChatMessage>,
        message: &str,
    ) -> Result<AgentOutcome, ApiError> {
        let policy = ToolPolicy::from_value(&settings.agent.tool_policy);
        let tool_specs = self.tools.list(&policy);
        let max_steps = settings.agent.max_steps.max(1);
        let max_observation = settings.rag.max_context_length.max(1);

        let mut messages = compose(build_agent_instructions(&tool_specs), history, message);
        let mut steps: Vec<AgentStep> = Vec::new();
        let mut sources: Vec<String> = Vec::new();

        for step in 0..max_steps {
            tracing::debug!("Agent step {}/{}", step + 1, max_steps);
            let completion = self
                .llm
                .chat(&settings.agent, ChatRequest::new(messages.clone()))
                .await?;

            let (tool, input) = match parse_agent_decision(&completion.content) {
                AgentDecision::Final(answer) => {
                    return Ok(AgentOutcome {
                        answer,
                        mode: AgentMode::Agent,
                        steps,
                        sources,
                        finished: true,
                    });
                }
                AgentDecision::Action { tool, input } => (tool, input),
            };

            let (observation, ok) = match self.tools.execute(&tool, input.clone(), &policy).await {
                Ok(output) => {
                    for source in output.sources {
                        if !sources.contains(&source) {
                            sources.push(source);
                        }
                    }
                    (output.content, true)
                }
                Err(err) => (format!("error: {}", err), false),
            };
            let observation = truncate_chars(&observation, max_observation);

            messages.push(ChatMessage::assistant(completion.content));
            messages.push(ChatMessage::user(format!("Observation: {}", observation)));
            steps.push(AgentStep {
                tool,
                input,
                output: observation,
                ok,
            });
        }

        tracing::warn!("Agent reached the step limit ({})", max_steps);
        messages.push(ChatMessage::user(STEP_LIMIT_PROMPT));
        let completion = self.llm.chat(&settings.agent, ChatRequest::new(messages)).await?;
        let answer = match parse_agent_decision(&completion.content) {
            AgentDecision::Final(answer) => answer,
            AgentDecision::Action { .. } => completion.content.trim().to_string(),
        };

        Ok(AgentOutcome {
            answer,
            mode: AgentMode::Agent,
            steps,
            sources,
            finished: false,
        })
    }
}

fn compose(system_prompt: String, history: Vec<ChatMessage>, message: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(system_prompt));
    messages.extend(history);
    messages.push(ChatMessage::user(message));
    messages
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push_str("... (truncated)");
    truncated
}
