//! Chat turn execution in direct, rag and tool-using agent modes.

mod instructions;
mod modes;
mod protocol;
mod runtime;

pub use modes::AgentMode;
pub use protocol::{parse_agent_decision, AgentDecision};
pub use runtime::{AgentOutcome, AgentRunner, AgentStep};
