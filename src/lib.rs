pub mod agent;
pub mod connectors;
pub mod core;
pub mod embedding;
pub mod history;
pub mod llm;
pub mod metrics;
pub mod rag;
pub mod records;
pub mod server;
pub mod state;
pub mod tools;

#[cfg(test)]
mod test_support;
