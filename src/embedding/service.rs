use std::sync::Arc;

use crate::core::errors::ApiError;
use crate::llm::EmbeddingProvider;
use crate::metrics::MetricsRecorder;

/// Batches embedding requests against the configured provider.
#[derive(Clone)]
pub struct EmbeddingService {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    metrics: MetricsRecorder,
}

impl EmbeddingService {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
        metrics: MetricsRecorder,
    ) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
            metrics,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    pub async fn create_embedding(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        let mut vectors = self.create_embeddings(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| ApiError::Upstream("Embedding provider returned no vector".to_string()))
    }

    pub async fn create_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        let mut vectors = Vec::with_capacity(texts.len());
        let mut expected_dim = self.provider.dimension();

        for batch in texts.chunks(self.batch_size) {
            let embedded = self
                .metrics
                .time("embedding", self.provider.embed(batch))
                .await?;

            if embedded.len() != batch.len() {
                return Err(ApiError::Upstream(format!(
                    "Embedding provider returned {} vectors for {} inputs",
                    embedded.len(),
                    batch.len()
                )));
            }

            for vector in embedded {
                if vector.is_empty() {
                    return Err(ApiError::Upstream(
                        "Embedding provider returned an empty vector".to_string(),
                    ));
                }
                match expected_dim {
                    Some(dim) if dim != vector.len() => {
                        return Err(ApiError::Upstream(format!(
                            "Embedding dimension mismatch: expected {}, got {}",
                            dim,
                            vector.len()
                        )));
                    }
                    Some(_) => {}
                    None => expected_dim = Some(vector.len()),
                }
                vectors.push(vector);
            }
        }

        tracing::debug!(
            "Embedded {} texts with {} ({})",
            texts.len(),
            self.provider.name(),
            self.provider.model()
        );
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
        dim: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        fn model(&self) -> &str {
            "counting-v1"
        }

        fn dimension(&self) -> Option<usize> {
            None
        }

        async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(inputs
                .iter()
                .map(|text| {
                    let mut v = vec![0.0; self.dim];
                    v[0] = text.len() as f32;
                    v
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn batches_and_preserves_order() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            dim: 3,
        });
        let metrics = MetricsRecorder::new();
        let service = EmbeddingService::new(provider.clone(), 2, metrics.clone());

        let texts: Vec<String> = ["a", "bb", "ccc", "dddd", "eeeee"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let vectors = service.create_embeddings(&texts).await.unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        let firsts: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
        assert_eq!(firsts, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(metrics.snapshot().operations["embedding"].count, 3);
    }

    #[tokio::test]
    async fn empty_input_makes_no_calls() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            dim: 3,
        });
        let service = EmbeddingService::new(provider.clone(), 8, MetricsRecorder::new());

        assert!(service.create_embeddings(&[]).await.unwrap().is_empty());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }
}
