//! SQLite-backed RAG store.
//!
//! Chunk metadata lives in SQLite next to the embedding blob; search is a
//! brute-force cosine scan over the (optionally collection-filtered) rows.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};

use super::store::{ChunkSearchResult, RagStore, SourceSummary, StoredChunk};
use crate::core::db;
use crate::core::errors::ApiError;

const INSERT_CHUNK: &str =
    "INSERT OR REPLACE INTO rag_chunks (chunk_id, content, source, collection, metadata, embedding)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

pub struct SqliteRagStore {
    pool: SqlitePool,
}

impl SqliteRagStore {
    pub async fn with_path(db_path: &Path) -> Result<Self, ApiError> {
        let pool = db::connect(db_path).await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS rag_chunks (
                chunk_id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                source TEXT NOT NULL DEFAULT '',
                collection TEXT NOT NULL DEFAULT 'default',
                metadata TEXT DEFAULT '{}',
                embedding BLOB,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_rag_collection ON rag_chunks(collection)")
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_rag_source ON rag_chunks(source)")
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS rag_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(())
    }

    /// Stable per collection, so re-ingesting identical content replaces
    /// rows without touching the same source in other collections.
    pub fn chunk_id(collection: &str, source: &str, chunk_index: usize, text: &str) -> String {
        let mut hasher = Sha256::new();
        for part in [collection, source, &chunk_index.to_string(), text] {
            hasher.update(part.as_bytes());
            hasher.update(b"|");
        }
        hex::encode(hasher.finalize())
    }

    async fn insert_in<'c>(
        tx: &mut sqlx::Transaction<'c, sqlx::Sqlite>,
        chunk: &StoredChunk,
        embedding: &[f32],
    ) -> Result<(), ApiError> {
        sqlx::query(INSERT_CHUNK)
            .bind(&chunk.chunk_id)
            .bind(&chunk.content)
            .bind(&chunk.source)
            .bind(&chunk.collection)
            .bind(Self::metadata_text(chunk)?)
            .bind(embedding_to_blob(embedding))
            .execute(&mut **tx)
            .await
            .map_err(ApiError::internal)?;
        Ok(())
    }

    fn chunk_start_offset(chunk: &StoredChunk) -> u64 {
        chunk
            .metadata
            .as_ref()
            .and_then(|metadata| metadata["start_offset"].as_u64())
            .unwrap_or(0)
    }

    fn metadata_text(chunk: &StoredChunk) -> Result<String, ApiError> {
        match &chunk.metadata {
            Some(metadata) => serde_json::to_string(metadata).map_err(ApiError::internal),
            None => Ok("{}".to_string()),
        }
    }

    fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> StoredChunk {
        let metadata_str: Option<String> = row.get("metadata");
        let metadata = metadata_str.and_then(|s| serde_json::from_str::<Value>(&s).ok());

        StoredChunk {
            chunk_id: row.get("chunk_id"),
            content: row.get("content"),
            source: row.get("source"),
            collection: row.get("collection"),
            metadata,
        }
    }
}

#[async_trait]
impl RagStore for SqliteRagStore {
    async fn insert(&self, chunk: StoredChunk, embedding: Vec<f32>) -> Result<(), ApiError> {
        sqlx::query(INSERT_CHUNK)
            .bind(&chunk.chunk_id)
            .bind(&chunk.content)
            .bind(&chunk.source)
            .bind(&chunk.collection)
            .bind(Self::metadata_text(&chunk)?)
            .bind(embedding_to_blob(&embedding))
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(())
    }

    async fn insert_batch(&self, items: Vec<(StoredChunk, Vec<f32>)>) -> Result<(), ApiError> {
        if items.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;
        for (chunk, embedding) in &items {
            Self::insert_in(&mut tx, chunk, embedding).await?;
        }
        tx.commit().await.map_err(ApiError::internal)?;
        Ok(())
    }

    async fn replace_sources(
        &self,
        sources: &[String],
        collection: &str,
        items: Vec<(StoredChunk, Vec<f32>)>,
    ) -> Result<(), ApiError> {
        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;
        for source in sources {
            sqlx::query("DELETE FROM rag_chunks WHERE source = ?1 AND collection = ?2")
                .bind(source)
                .bind(collection)
                .execute(&mut *tx)
                .await
                .map_err(ApiError::internal)?;
        }
        for (chunk, embedding) in &items {
            Self::insert_in(&mut tx, chunk, embedding).await?;
        }
        // Dropping an uncommitted transaction rolls it back.
        tx.commit().await.map_err(ApiError::internal)?;
        Ok(())
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
        collection: Option<&str>,
    ) -> Result<Vec<ChunkSearchResult>, ApiError> {
        let rows = sqlx::query(
            "SELECT chunk_id, content, source, collection, metadata, embedding
             FROM rag_chunks
             WHERE ?1 IS NULL OR collection = ?1",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let mut scored: Vec<ChunkSearchResult> = rows
            .iter()
            .filter_map(|row| {
                let embedding_bytes: Option<Vec<u8>> = row.get("embedding");
                let embedding_bytes = embedding_bytes.filter(|b| !b.is_empty())?;
                let stored_emb = blob_to_embedding(&embedding_bytes);
                let score = cosine(query_embedding, &stored_emb);

                Some(ChunkSearchResult {
                    chunk: Self::row_to_chunk(row),
                    score,
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit.max(1));

        Ok(scored)
    }

    async fn text_search(
        &self,
        pattern: &str,
        limit: usize,
        collection: Option<&str>,
    ) -> Result<Vec<StoredChunk>, ApiError> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT chunk_id, content, source, collection, metadata
             FROM rag_chunks
             WHERE (?1 IS NULL OR collection = ?1) AND content LIKE ?2
             ORDER BY created_at DESC
             LIMIT ?3",
        )
        .bind(collection)
        .bind(format!("%{}%", pattern))
        .bind(limit.max(1) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(rows.iter().map(Self::row_to_chunk).collect())
    }

    async fn get_chunk(&self, chunk_id: &str) -> Result<Option<StoredChunk>, ApiError> {
        let row = sqlx::query(
            "SELECT chunk_id, content, source, collection, metadata
             FROM rag_chunks
             WHERE chunk_id = ?1",
        )
        .bind(chunk_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(row.as_ref().map(Self::row_to_chunk))
    }

    async fn get_chunk_window(
        &self,
        chunk_id: &str,
        max_chars: usize,
    ) -> Result<Vec<StoredChunk>, ApiError> {
        if max_chars == 0 {
            return Ok(Vec::new());
        }

        let Some(target) = self.get_chunk(chunk_id).await? else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(
            "SELECT chunk_id, content, source, collection, metadata
             FROM rag_chunks
             WHERE collection = ?1 AND source = ?2",
        )
        .bind(&target.collection)
        .bind(&target.source)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let mut chunks: Vec<StoredChunk> = rows.iter().map(Self::row_to_chunk).collect();
        chunks.sort_by_key(Self::chunk_start_offset);

        let Some(target_idx) = chunks
            .iter()
            .position(|chunk| chunk.chunk_id == target.chunk_id)
        else {
            return Ok(vec![target]);
        };

        // Grow a contiguous run around the target while it fits in max_chars.
        let chars = |idx: usize| chunks[idx].content.chars().count();
        let mut budget = max_chars.saturating_sub(chars(target_idx));
        let (mut start, mut end) = (target_idx, target_idx + 1);
        loop {
            let take_left = start > 0 && chars(start - 1) <= budget;
            if take_left {
                start -= 1;
                budget -= chars(start);
            }
            let take_right = end < chunks.len() && chars(end) <= budget;
            if take_right {
                budget -= chars(end);
                end += 1;
            }
            if !take_left && !take_right {
                break;
            }
        }

        Ok(chunks.drain(start..end).collect())
    }

    async fn delete_source(&self, source: &str, collection: Option<&str>) -> Result<usize, ApiError> {
        let result = sqlx::query(
            "DELETE FROM rag_chunks WHERE source = ?1 AND (?2 IS NULL OR collection = ?2)",
        )
        .bind(source)
        .bind(collection)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(result.rows_affected() as usize)
    }

    async fn delete_collection(&self, collection: &str) -> Result<usize, ApiError> {
        let result = sqlx::query("DELETE FROM rag_chunks WHERE collection = ?1")
            .bind(collection)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(result.rows_affected() as usize)
    }

    async fn count(&self, collection: Option<&str>) -> Result<usize, ApiError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM rag_chunks WHERE ?1 IS NULL OR collection = ?1")
                .bind(collection)
                .fetch_one(&self.pool)
                .await
                .map_err(ApiError::internal)?;

        Ok(count as usize)
    }

    async fn list_sources(&self, collection: Option<&str>) -> Result<Vec<SourceSummary>, ApiError> {
        let rows = sqlx::query(
            "SELECT source, collection, COUNT(*) AS chunks
             FROM rag_chunks
             WHERE ?1 IS NULL OR collection = ?1
             GROUP BY collection, source
             ORDER BY collection, source",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(rows
            .iter()
            .map(|row| SourceSummary {
                source: row.get("source"),
                collection: row.get("collection"),
                chunks: row.get::<i64, _>("chunks") as usize,
            })
            .collect())
    }

    async fn embedding_model(&self) -> Result<Option<String>, ApiError> {
        sqlx::query_scalar("SELECT value FROM rag_meta WHERE key = 'embedding_model'")
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::internal)
    }

    async fn reindex_with_model(&self, embedding_model: &str) -> Result<(), ApiError> {
        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        sqlx::query("DELETE FROM rag_chunks")
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

        sqlx::query(
            "INSERT OR REPLACE INTO rag_meta (key, value, updated_at)
             VALUES ('embedding_model', ?1, STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))",
        )
        .bind(embedding_model)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::internal)?;

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(())
    }
}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .filter_map(|bytes| bytes.try_into().ok().map(f32::from_le_bytes))
        .collect()
}

/// Cosine similarity; mismatched or zero vectors score 0.
fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let (mut dot, mut aa, mut bb) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        aa += x * x;
        bb += y * y;
    }
    let norm = (aa * bb).sqrt();
    if norm > f32::EPSILON {
        dot / norm
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (TempDir, SqliteRagStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteRagStore::with_path(&dir.path().join("vectors.db"))
            .await
            .unwrap();
        (dir, store)
    }

    fn make_chunk(
        id: &str,
        content: &str,
        source: &str,
        collection: &str,
        start_offset: usize,
    ) -> StoredChunk {
        StoredChunk {
            chunk_id: id.to_string(),
            content: content.to_string(),
            source: source.to_string(),
            collection: collection.to_string(),
            metadata: Some(serde_json::json!({ "start_offset": start_offset })),
        }
    }

    #[tokio::test]
    async fn insert_and_search_ranks_by_similarity() {
        let (_dir, store) = test_store().await;

        store
            .insert_batch(vec![
                (make_chunk("c1", "cats", "doc", "default", 0), vec![1.0, 0.0, 0.0]),
                (make_chunk("c2", "dogs", "doc", "default", 10), vec![0.7, 0.7, 0.0]),
                (make_chunk("c3", "fish", "doc", "other", 0), vec![1.0, 0.0, 0.0]),
                (make_chunk("c4", "odd", "doc", "default", 20), vec![1.0, 0.0]),
            ])
            .await
            .unwrap();
        assert_eq!(store.count(None).await.unwrap(), 4);
        assert_eq!(store.count(Some("default")).await.unwrap(), 3);

        let results = store.search(&[1.0, 0.0, 0.0], 10, Some("default")).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.chunk.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c4"]);
        assert!(results[0].score > 0.99);
        assert_eq!(results[2].score, 0.0);

        let top = store.search(&[1.0, 0.0, 0.0], 0, None).await.unwrap();
        assert_eq!(top.len(), 1);
    }

    #[tokio::test]
    async fn text_search_and_get_chunk() {
        let (_dir, store) = test_store().await;

        store
            .insert(make_chunk("c1", "Rust memory safety", "doc", "default", 0), vec![1.0])
            .await
            .unwrap();
        store
            .insert(make_chunk("c2", "Python tips", "doc", "default", 100), vec![1.0])
            .await
            .unwrap();

        let text_results = store.text_search("memory", 10, Some("default")).await.unwrap();
        assert_eq!(text_results.len(), 1);
        assert_eq!(text_results[0].chunk_id, "c1");
        assert!(store.text_search("  ", 10, None).await.unwrap().is_empty());

        let chunk = store.get_chunk("c2").await.unwrap().unwrap();
        assert_eq!(chunk.content, "Python tips");
        assert!(store.get_chunk("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_chunk_window_collects_neighbors_by_offset() {
        let (_dir, store) = test_store().await;

        for (id, text, offset) in [("c1", "AAAA", 0), ("c2", "BBBB", 10), ("c3", "CCCC", 20)] {
            store
                .insert(make_chunk(id, text, "doc", "default", offset), vec![1.0])
                .await
                .unwrap();
        }

        let window = store.get_chunk_window("c2", 12).await.unwrap();
        let ids: Vec<String> = window.into_iter().map(|c| c.chunk_id).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);

        let narrow = store.get_chunk_window("c2", 8).await.unwrap();
        assert_eq!(narrow.len(), 2);
    }

    #[tokio::test]
    async fn sources_and_deletion() {
        let (_dir, store) = test_store().await;

        store
            .insert_batch(vec![
                (make_chunk("a1", "x", "a.md", "default", 0), vec![1.0]),
                (make_chunk("a2", "y", "a.md", "default", 1), vec![1.0]),
                (make_chunk("b1", "z", "b.md", "notes", 0), vec![1.0]),
            ])
            .await
            .unwrap();

        let sources = store.list_sources(None).await.unwrap();
        assert_eq!(
            sources,
            vec![
                SourceSummary { source: "a.md".into(), collection: "default".into(), chunks: 2 },
                SourceSummary { source: "b.md".into(), collection: "notes".into(), chunks: 1 },
            ]
        );

        assert_eq!(store.delete_source("a.md", Some("notes")).await.unwrap(), 0);
        assert_eq!(store.delete_source("a.md", None).await.unwrap(), 2);
        assert_eq!(store.delete_collection("notes").await.unwrap(), 1);
        assert_eq!(store.count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reindex_with_model_clears_vectors() {
        let (_dir, store) = test_store().await;
        assert_eq!(store.embedding_model().await.unwrap(), None);

        store
            .insert(make_chunk("c1", "data", "doc", "default", 0), vec![1.0])
            .await
            .unwrap();
        store.reindex_with_model("embed-v2").await.unwrap();

        assert_eq!(store.count(None).await.unwrap(), 0);
        assert_eq!(store.embedding_model().await.unwrap().as_deref(), Some("embed-v2"));
    }

    #[tokio::test]
    async fn replace_sources_keeps_old_rows_when_an_insert_fails() {
        let (_dir, store) = test_store().await;
        store
            .insert_batch(vec![
                (make_chunk("old1", "first draft", "a.md", "default", 0), vec![1.0]),
                (make_chunk("other", "kept", "b.md", "default", 0), vec![1.0]),
            ])
            .await
            .unwrap();
        sqlx::query(
            "CREATE TRIGGER reject_boom BEFORE INSERT ON rag_chunks
             WHEN NEW.content = 'boom'
             BEGIN SELECT RAISE(ABORT, 'rejected'); END",
        )
        .execute(&store.pool)
        .await
        .unwrap();

        let sources = vec!["a.md".to_string()];
        let err = store
            .replace_sources(
                &sources,
                "default",
                vec![
                    (make_chunk("new1", "second draft", "a.md", "default", 0), vec![1.0]),
                    (make_chunk("new2", "boom", "a.md", "default", 12), vec![1.0]),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Internal(_)));

        assert!(store.get_chunk("old1").await.unwrap().is_some());
        assert!(store.get_chunk("new1").await.unwrap().is_none());
        assert_eq!(store.count(None).await.unwrap(), 2);

        store
            .replace_sources(
                &sources,
                "default",
                vec![(make_chunk("new1", "second draft", "a.md", "default", 0), vec![1.0])],
            )
            .await
            .unwrap();
        assert!(store.get_chunk("old1").await.unwrap().is_none());
        assert!(store.get_chunk("other").await.unwrap().is_some());
    }

    #[test]
    fn chunk_ids_are_stable_and_distinct() {
        let a = SqliteRagStore::chunk_id("default", "doc", 0, "hello");
        assert_eq!(a, SqliteRagStore::chunk_id("default", "doc", 0, "hello"));
        assert_ne!(a, SqliteRagStore::chunk_id("default", "doc", 1, "hello"));
        assert_ne!(a, SqliteRagStore::chunk_id("notes", "doc", 0, "hello"));
        assert_eq!(a.len(), 64);
    }
}
