//! RAG (Retrieval-Augmented Generation) module.
//!
//! - `SqliteRagStore`: chunk storage with brute-force cosine search
//! - `KnowledgeBase`: splits, embeds, stores and retrieves
//! - `ContextBuilder`: turns search results into a cited prompt context

mod context_builder;
mod engine;
mod sqlite;
mod store;

pub use context_builder::{BuiltContext, ContextBuilder};
pub(crate) use engine::fetch_text;
pub use engine::{IngestReport, KnowledgeBase};
pub use sqlite::SqliteRagStore;
pub use store::{ChunkSearchResult, RagStore, SourceSummary, StoredChunk};
