//! RagStore trait: storage interface for the retrieval pipeline.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::errors::ApiError;

/// A stored RAG chunk with metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChunk {
    pub chunk_id: String,
    pub content: String,
    /// Source identifier (URL, document name, `dataset:<name>/<id>`).
    pub source: String,
    pub collection: String,
    pub metadata: Option<serde_json::Value>,
}

/// Result of a similarity search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSearchResult {
    pub chunk: StoredChunk,
    /// Cosine similarity (higher = better).
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub source: String,
    pub collection: String,
    pub chunks: usize,
}

#[async_trait]
pub trait RagStore: Send + Sync {
    /// Insert or replace a chunk with its embedding vector.
    async fn insert(&self, chunk: StoredChunk, embedding: Vec<f32>) -> Result<(), ApiError>;

    /// Insert multiple chunks in one transaction.
    async fn insert_batch(&self, items: Vec<(StoredChunk, Vec<f32>)>) -> Result<(), ApiError>;

    /// Deletes every chunk of `sources` in `collection` and inserts `items`,
    /// all or nothing.
    async fn replace_sources(
        &self,
        sources: &[String],
        collection: &str,
        items: Vec<(StoredChunk, Vec<f32>)>,
    ) -> Result<(), ApiError>;

    /// Chunks most similar to the query embedding, best first.
    async fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
        collection: Option<&str>,
    ) -> Result<Vec<ChunkSearchResult>, ApiError>;

    /// Substring match over chunk content, newest first.
    async fn text_search(
        &self,
        pattern: &str,
        limit: usize,
        collection: Option<&str>,
    ) -> Result<Vec<StoredChunk>, ApiError>;

    async fn get_chunk(&self, chunk_id: &str) -> Result<Option<StoredChunk>, ApiError>;

    /// The chunk plus its neighbours from the same source, in document
    /// order, bounded by `max_chars`.
    async fn get_chunk_window(
        &self,
        chunk_id: &str,
        max_chars: usize,
    ) -> Result<Vec<StoredChunk>, ApiError>;

    async fn delete_source(&self, source: &str, collection: Option<&str>) -> Result<usize, ApiError>;

    async fn delete_collection(&self, collection: &str) -> Result<usize, ApiError>;

    async fn count(&self, collection: Option<&str>) -> Result<usize, ApiError>;

    async fn list_sources(&self, collection: Option<&str>) -> Result<Vec<SourceSummary>, ApiError>;

    /// Embedding model the stored vectors were produced with.
    async fn embedding_model(&self) -> Result<Option<String>, ApiError>;

    /// Drop every vector and record `embedding_model` as the current model.
    async fn reindex_with_model(&self, embedding_model: &str) -> Result<(), ApiError>;
}
