//! CSV loading into the record store, and record export to the vector store.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use super::store::{validate_dataset_name, Record, RecordStore};
use crate::core::config::settings::IngestSettings;
use crate::core::errors::ApiError;
use crate::rag::{fetch_text, KnowledgeBase};

/// Vector-store collection holding embedded dataset records.
pub const DATASET_COLLECTION: &str = "datasets";

const EMBED_PAGE_SIZE: i64 = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub dataset: String,
    pub rows: usize,
}

pub struct DatasetLoader {
    records: RecordStore,
    client: reqwest::Client,
    max_download_bytes: usize,
}

impl DatasetLoader {
    pub fn new(records: RecordStore, ingest: &IngestSettings) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(ingest.download_timeout_secs.max(1)))
            .build()
            .map_err(ApiError::internal)?;

        Ok(Self {
            records,
            client,
            max_download_bytes: ingest.max_download_bytes,
        })
    }

    /// Parses CSV text (header row first) and inserts every row.
    pub async fn load_csv_str(&self, dataset: &str, csv_text: &str) -> Result<LoadReport, ApiError> {
        validate_dataset_name(dataset)?;
        let rows = parse_csv(csv_text)?;
        let count = self.records.create_many(dataset, rows).await?;

        tracing::info!("Loaded {} rows into dataset '{}'", count, dataset);
        Ok(LoadReport {
            dataset: dataset.to_string(),
            rows: count,
        })
    }

    pub async fn load_csv_file(&self, dataset: &str, path: &Path) -> Result<LoadReport, ApiError> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            ApiError::BadRequest(format!("Failed to read {}: {}", path.display(), e))
        })?;
        self.load_csv_str(dataset, &text).await
    }

    pub async fn download_csv(&self, dataset: &str, url: &str) -> Result<LoadReport, ApiError> {
        let parsed = reqwest::Url::parse(url.trim())
            .map_err(|e| ApiError::BadRequest(format!("Invalid URL {}: {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ApiError::BadRequest(format!(
                "Unsupported URL scheme: {}",
                parsed.scheme()
            )));
        }

        tracing::info!("Downloading dataset '{}' from {}", dataset, parsed);
        let (text, _) = fetch_text(&self.client, parsed, self.max_download_bytes).await?;
        self.load_csv_str(dataset, &text).await
    }
}

fn parse_csv(csv_text: &str) -> Result<Vec<Value>, ApiError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .trim(csv::Trim::All)
        .from_reader(csv_text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(csv_error)?
        .iter()
        .enumerate()
        .map(|(i, name)| {
            if name.is_empty() {
                format!("column_{}", i + 1)
            } else {
                name.to_string()
            }
        })
        .collect();

    if headers.is_empty() || csv_text.trim().is_empty() {
        return Err(ApiError::BadRequest("CSV has no header row".to_string()));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_error)?;
        let mut row = Map::new();
        for (key, cell) in headers.iter().zip(record.iter()) {
            row.insert(key.clone(), typed_cell(cell));
        }
        rows.push(Value::Object(row));
    }

    Ok(rows)
}

fn csv_error(err: csv::Error) -> ApiError {
    let line = err.position().map(|pos| pos.line());
    let message = match err.kind() {
        csv::ErrorKind::UnequalLengths {
            expected_len, len, ..
        } => format!("expected {} fields, found {}", expected_len, len),
        _ => err.to_string(),
    };

    match line {
        Some(line) => ApiError::BadRequest(format!("CSV error on line {}: {}", line, message)),
        None => ApiError::BadRequest(format!("CSV error: {}", message)),
    }
}

/// Integer, then float, then bool, otherwise string; empty is null.
fn typed_cell(cell: &str) -> Value {
    if cell.is_empty() {
        return Value::Null;
    }
    if let Ok(int) = cell.parse::<i64>() {
        return Value::Number(int.into());
    }
    if let Some(number) = cell.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(number);
    }
    match cell.to_ascii_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(cell.to_string()),
    }
}

/// Vector-store source name for a record.
pub fn record_source(dataset: &str, id: i64) -> String {
    format!("dataset:{}/{}", dataset, id)
}

/// `key: value; ...` rendering used as the embedded text. Nulls are skipped.
pub fn record_text(record: &Record) -> String {
    match &record.data {
        Value::Object(map) => map
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(key, value)| match value {
                Value::String(s) => format!("{}: {}", key, s),
                other => format!("{}: {}", key, other),
            })
            .collect::<Vec<_>>()
            .join("; "),
        other => other.to_string(),
    }
}

/// Embeds every record of `dataset` into the `datasets` collection and
/// returns the number of chunks written.
pub async fn embed_dataset(
    records: &RecordStore,
    knowledge: &KnowledgeBase,
    dataset: &str,
) -> Result<usize, ApiError> {
    validate_dataset_name(dataset)?;
    if records.count(Some(dataset)).await? == 0 {
        return Err(ApiError::NotFound(format!("Dataset {} not found", dataset)));
    }

    let mut chunks = 0usize;
    let mut offset = 0i64;
    loop {
        let page = records.list(dataset, EMBED_PAGE_SIZE, offset).await?;
        if page.is_empty() {
            break;
        }
        offset += page.len() as i64;

        let documents: Vec<(String, String)> = page
            .iter()
            .map(|record| (record_source(dataset, record.id), record_text(record)))
            .filter(|(_, text)| !text.trim().is_empty())
            .collect();
        if documents.is_empty() {
            continue;
        }

        let reports = knowledge
            .ingest_documents(&documents, Some(DATASET_COLLECTION))
            .await?;
        chunks += reports.iter().map(|report| report.chunks).sum::<usize>();
    }

    tracing::info!("Embedded dataset '{}' into {} chunks", dataset, chunks);
    Ok(chunks)
}

/// Deletes a record along with any vectors embedded from it.
pub async fn remove_record(
    records: &RecordStore,
    knowledge: Option<&KnowledgeBase>,
    id: i64,
) -> Result<Record, ApiError> {
    let Some(record) = records.get(id).await? else {
        return Err(ApiError::NotFound(format!("Record {} not found", id)));
    };

    records.delete(id).await?;
    if let Some(knowledge) = knowledge {
        knowledge
            .store()
            .delete_source(&record_source(&record.dataset, id), Some(DATASET_COLLECTION))
            .await?;
    }
    Ok(record)
}

/// Deletes every record of `dataset` and its embedded vectors.
pub async fn remove_dataset(
    records: &RecordStore,
    knowledge: Option<&KnowledgeBase>,
    dataset: &str,
) -> Result<u64, ApiError> {
    validate_dataset_name(dataset)?;

    if let Some(knowledge) = knowledge {
        let mut offset = 0i64;
        loop {
            let page = records.list(dataset, EMBED_PAGE_SIZE, offset).await?;
            if page.is_empty() {
                break;
            }
            offset += page.len() as i64;
            for record in &page {
                knowledge
                    .store()
                    .delete_source(&record_source(dataset, record.id), Some(DATASET_COLLECTION))
                    .await?;
            }
        }
    }

    let deleted = records.delete_dataset(dataset).await?;
    tracing::info!("Deleted dataset '{}' ({} records)", dataset, deleted);
    Ok(deleted)
}
