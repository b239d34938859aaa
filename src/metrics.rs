//! In-process latency and token accounting.
//!
//! Every remote call (LLM, embeddings, tools, retrieval) reports here; the
//! `/api/metrics` endpoint serves a snapshot.

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

const MAX_SAMPLES: usize = 1024;

#[derive(Clone)]
pub struct MetricsRecorder {
    inner: Arc<Mutex<MetricsInner>>,
}

struct MetricsInner {
    started_at: Instant,
    started_at_wall: DateTime<Utc>,
    operations: BTreeMap<String, OperationStats>,
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Default)]
struct OperationStats {
    count: u64,
    errors: u64,
    samples_ms: VecDeque<f64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OperationSummary {
    pub count: u64,
    pub errors: u64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenTotals {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub started_at: String,
    pub uptime_secs: u64,
    pub operations: BTreeMap<String, OperationSummary>,
    pub tokens: TokenTotals,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsInner {
                started_at: Instant::now(),
                started_at_wall: Utc::now(),
                operations: BTreeMap::new(),
                prompt_tokens: 0,
                completion_tokens: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MetricsInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, operation: &str, duration: Duration, ok: bool) {
        let mut inner = self.lock();
        let stats = inner.operations.entry(operation.to_string()).or_default();
        stats.count += 1;
        if !ok {
            stats.errors += 1;
        }
        if stats.samples_ms.len() == MAX_SAMPLES {
            stats.samples_ms.pop_front();
        }
        stats.samples_ms.push_back(duration.as_secs_f64() * 1000.0);
    }

    pub fn record_tokens(&self, prompt: u64, completion: u64) {
        let mut inner = self.lock();
        inner.prompt_tokens += prompt;
        inner.completion_tokens += completion;
    }

    /// Awaits `future` and records its latency and outcome under `operation`.
    pub async fn time<T, E, F>(&self, operation: &str, future: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let result = future.await;
        self.record(operation, started.elapsed(), result.is_ok());
        result
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.lock();
        let operations = inner
            .operations
            .iter()
            .map(|(name, stats)| (name.clone(), summarize(stats)))
            .collect();

        MetricsSnapshot {
            started_at: inner.started_at_wall.to_rfc3339(),
            uptime_secs: inner.started_at.elapsed().as_secs(),
            operations,
            tokens: TokenTotals {
                prompt: inner.prompt_tokens,
                completion: inner.completion_tokens,
                total: inner.prompt_tokens + inner.completion_tokens,
            },
        }
    }

    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.operations.clear();
        inner.prompt_tokens = 0;
        inner.completion_tokens = 0;
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

fn summarize(stats: &OperationStats) -> OperationSummary {
    let mut sorted: Vec<f64> = stats.samples_ms.iter().copied().collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mean_ms = if sorted.is_empty() {
        0.0
    } else {
        sorted.iter().sum::<f64>() / sorted.len() as f64
    };

    OperationSummary {
        count: stats.count,
        errors: stats.errors,
        mean_ms,
        p50_ms: percentile(&sorted, 0.50),
        p95_ms: percentile(&sorted, 0.95),
        max_ms: sorted.last().copied().unwrap_or(0.0),
    }
}

/// Nearest-rank percentile over an ascending slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
