//! Knowledge base: ingestion and retrieval over the vector store.
//!
//! Collects text from:
//! - Direct text input
//! - Web pages and plain-text URLs
//! - Dataset records (see `records::embed_dataset`)

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures_util::StreamExt;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::sqlite::SqliteRagStore;
use super::store::{ChunkSearchResult, RagStore, StoredChunk};
use crate::core::config::settings::{IngestSettings, RagSettings};
use crate::core::errors::ApiError;
use crate::embedding::{EmbeddingService, RecursiveTextSplitter, TextChunk};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub source: String,
    pub collection: String,
    pub chunks: usize,
}

pub struct KnowledgeBase {
    store: Arc<dyn RagStore>,
    embeddings: EmbeddingService,
    splitter: RecursiveTextSplitter,
    settings: RagSettings,
    max_download_bytes: usize,
    client: reqwest::Client,
}

impl KnowledgeBase {
    pub fn new(
        store: Arc<dyn RagStore>,
        embeddings: EmbeddingService,
        settings: &RagSettings,
        ingest: &IngestSettings,
    ) -> Result<Self, ApiError> {
        let splitter = RecursiveTextSplitter::new(settings.chunk_size, settings.chunk_overlap)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(ingest.download_timeout_secs.max(1)))
            .build()
            .map_err(ApiError::internal)?;

        Ok(Self {
            store,
            embeddings,
            splitter,
            settings: settings.clone(),
            max_download_bytes: ingest.max_download_bytes,
            client,
        })
    }

    pub fn store(&self) -> &Arc<dyn RagStore> {
        &self.store
    }

    pub fn embeddings(&self) -> &EmbeddingService {
        &self.embeddings
    }

    pub fn default_collection(&self) -> &str {
        &self.settings.default_collection
    }

    /// Clears stored vectors when they were produced by another model.
    ///
    /// Returns `true` when a reindex happened.
    pub async fn sync_embedding_model(&self) -> Result<bool, ApiError> {
        let configured = self.embeddings.model().to_string();
        let stored = self.store.embedding_model().await?;

        if stored.as_deref() == Some(configured.as_str()) {
            return Ok(false);
        }

        let existing = self.store.count(None).await?;
        if existing > 0 {
            tracing::warn!(
                "Embedding model changed ({} -> {}); clearing {} stored chunks",
                stored.as_deref().unwrap_or("unknown"),
                configured,
                existing
            );
        }
        self.store.reindex_with_model(&configured).await?;
        Ok(existing > 0)
    }

    pub async fn ingest_text(
        &self,
        source: &str,
        content: &str,
        collection: Option<&str>,
    ) -> Result<IngestReport, ApiError> {
        if content.trim().is_empty() {
            return Err(ApiError::BadRequest(format!(
                "No content to ingest for {}",
                source.trim()
            )));
        }
        let mut reports = self
            .ingest_documents(&[(source.to_string(), content.to_string())], collection)
            .await?;
        reports
            .pop()
            .ok_or_else(|| ApiError::internal("ingest produced no report"))
    }

    /// Splits and embeds several `(source, content)` documents in shared
    /// embedding batches. Each source's previous chunks in the collection
    /// are replaced.
    pub async fn ingest_documents(
        &self,
        documents: &[(String, String)],
        collection: Option<&str>,
    ) -> Result<Vec<IngestReport>, ApiError> {
        let collection = collection
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(&self.settings.default_collection)
            .to_string();

        let mut reports = Vec::with_capacity(documents.len());
        let mut pending: Vec<(String, TextChunk)> = Vec::new();
        for (source, content) in documents {
            let source = source.trim();
            if source.is_empty() {
                return Err(ApiError::BadRequest("source is required".to_string()));
            }
            let chunks = self.splitter.split_with_offsets(content);
            reports.push(IngestReport {
                source: source.to_string(),
                collection: collection.clone(),
                chunks: chunks.len(),
            });
            pending.extend(chunks.into_iter().map(|chunk| (source.to_string(), chunk)));
        }

        let texts: Vec<String> = pending.iter().map(|(_, chunk)| chunk.text.clone()).collect();
        let vectors = self.embeddings.create_embeddings(&texts).await?;

        let model = self.embeddings.model().to_string();
        let items: Vec<(StoredChunk, Vec<f32>)> = pending
            .into_iter()
            .zip(vectors)
            .map(|((source, chunk), vector)| {
                let stored = StoredChunk {
                    chunk_id: SqliteRagStore::chunk_id(
                        &collection,
                        &source,
                        chunk.chunk_index,
                        &chunk.text,
                    ),
                    content: chunk.text,
                    source,
                    collection: collection.clone(),
                    metadata: Some(serde_json::json!({
                        "start_offset": chunk.start_offset,
                        "chunk_index": chunk.chunk_index,
                        "embedding_model": model,
                    })),
                };
                (stored, vector)
            })
            .collect();
        let total = items.len();

        let sources: Vec<String> = reports.iter().map(|report| report.source.clone()).collect();
        self.store.replace_sources(&sources, &collection, items).await?;

        tracing::info!(
            "Ingested {} chunks from {} sources into '{}'",
            total,
            reports.len(),
            collection
        );
        Ok(reports)
    }

    pub async fn ingest_url(
        &self,
        url: &str,
        collection: Option<&str>,
    ) -> Result<IngestReport, ApiError> {
        let parsed = reqwest::Url::parse(url.trim())
            .map_err(|e| ApiError::BadRequest(format!("Invalid URL {}: {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ApiError::BadRequest(format!(
                "Unsupported URL scheme: {}",
                parsed.scheme()
            )));
        }

        let (body, is_html) = self.download(parsed.clone()).await?;
        let text = if is_html { strip_html_tags(&body) } else { body };

        self.ingest_text(parsed.as_str(), &text, collection).await
    }

    /// Fetches a URL as text, enforcing the download size cap.
    pub async fn download(&self, url: reqwest::Url) -> Result<(String, bool), ApiError> {
        fetch_text(&self.client, url, self.max_download_bytes).await
    }

    /// Embeds `query` and returns matches at or above the similarity threshold.
    pub async fn retrieve(
        &self,
        query: &str,
        limit: Option<usize>,
        collection: Option<&str>,
    ) -> Result<Vec<ChunkSearchResult>, ApiError> {
        if query.trim().is_empty() {
            return Err(ApiError::BadRequest("query is required".to_string()));
        }

        let query_embedding = self.embeddings.create_embedding(query).await?;
        let limit = limit.unwrap_or(self.settings.top_k);
        let threshold = self.settings.similarity_threshold;

        let results = self
            .store
            .search(&query_embedding, limit, collection)
            .await?
            .into_iter()
            .filter(|result| result.score >= threshold)
            .collect::<Vec<_>>();

        tracing::debug!("Retrieved {} chunks for query", results.len());
        Ok(results)
    }
}

/// Downloads `url` as UTF-8 text, failing once more than `max_bytes`
/// arrive. The flag reports whether the body looks like HTML.
pub(crate) async fn fetch_text(
    client: &reqwest::Client,
    url: reqwest::Url,
    max_bytes: usize,
) -> Result<(String, bool), ApiError> {
    let response = client.get(url.clone()).send().await.map_err(ApiError::upstream)?;

    if !response.status().is_success() {
        return Err(ApiError::Upstream(format!(
            "Download of {} failed with status {}",
            url,
            response.status()
        )));
    }
    if let Some(length) = response.content_length() {
        if length as usize > max_bytes {
            return Err(ApiError::BadRequest(format!(
                "{} is {} bytes, over the {} byte limit",
                url, length, max_bytes
            )));
        }
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    let mut bytes: Vec<u8> = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(ApiError::upstream)?;
        if bytes.len() + chunk.len() > max_bytes {
            return Err(ApiError::BadRequest(format!(
                "{} exceeds the {} byte download limit",
                url, max_bytes
            )));
        }
        bytes.extend_from_slice(&chunk);
    }

    let text = String::from_utf8_lossy(&bytes).into_owned();
    let is_html = content_type.contains("html")
        || text.trim_start().to_ascii_lowercase().starts_with("<!doctype html")
        || text.trim_start().to_ascii_lowercase().starts_with("<html");
    Ok((text, is_html))
}

fn html_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?is)<script\b.*?</script\s*>",
            r"(?is)<style\b.*?</style\s*>",
            r"(?s)<!--.*?-->",
            r"(?s)<[^>]*>",
        ]
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
    })
}

/// Strips tags, comments and script/style bodies, keeping one line per
/// non-empty text run.
pub(crate) fn strip_html_tags(html: &str) -> String {
    let mut text = html.to_string();
    for pattern in html_patterns() {
        text = pattern.replace_all(&text, "\n").into_owned();
    }

    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
