//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]** — returns errors; used when embeddings are not configured.
//! - **[`OllamaProvider`]** — calls an Ollama-compatible `/api/embeddings` endpoint
//!   with bounded concurrency, retry, and backoff.
//!
//! Also provides vector utilities used by the index backends:
//! - [`cosine_similarity`] — similarity between two vectors (higher is better)
//! - [`euclidean_distance`] — L2 distance between two vectors (lower is better)
//! - [`vec_to_blob`] / [`blob_to_vec`] — little-endian `f32` encoding for SQLite BLOBs
//!
//! # Retry Strategy
//!
//! Each text is one remote call. Calls are retried with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: `retry_backoff_ms` doubled per attempt (capped at 2^5)
//!
//! # Empty input
//!
//! Empty strings are forwarded unchanged; what the service returns for them
//! is up to the model. The chunker never produces empty chunks and the
//! retrieval service rejects empty queries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingConfig;
use crate::error::RagError;

/// Trait for embedding providers.
///
/// `embed` returns exactly one vector per input text, in input order, all of
/// the same dimension. Any failure fails the whole call; callers never
/// receive a partial result.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"bge-m3:latest"`).
    fn model_name(&self) -> &str;

    /// Embed a batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError>;

    /// Embed a single text. Equivalent to `embed(&[text])[0]`.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, RagError> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::provider(None, "empty embedding response"))
    }
}

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns errors.
///
/// Used when `embedding.provider = "disabled"` in the configuration.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        Err(RagError::provider(None, "embedding provider is disabled"))
    }
}

// ============ Ollama Provider ============

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

/// Embedding provider for an Ollama-compatible HTTP service.
///
/// Sends `POST {base_url}/api/embeddings` with `{"model", "prompt"}` per text
/// and reads `{"embedding": [...]}`. Up to `concurrency` calls are in flight
/// at once; results are collected in input order.
pub struct OllamaProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    max_retries: u32,
    retry_backoff: Duration,
    concurrency: usize,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, RagError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/embeddings", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            concurrency: config.concurrency.max(1),
        })
    }

    /// One remote call with retry/backoff.
    async fn embed_single(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let body = EmbeddingRequest {
            model: &self.model,
            prompt: text,
        };

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.retry_backoff * (1u32 << (attempt - 1).min(5));
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying embedding request"
                );
                tokio::time::sleep(delay).await;
            }

            let resp = self.client.post(&self.endpoint).json(&body).send().await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let parsed: EmbeddingResponse = response.json().await.map_err(|e| {
                            RagError::provider(
                                Some(status.as_u16()),
                                format!("invalid embedding response: {}", e),
                            )
                        })?;
                        if parsed.embedding.is_empty() {
                            return Err(RagError::provider(
                                Some(status.as_u16()),
                                "embedding response contained no vector",
                            ));
                        }
                        return Ok(parsed.embedding);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = RagError::provider(Some(status.as_u16()), body_text);

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(err);
                        continue;
                    }

                    return Err(err);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| RagError::provider(None, "embedding failed after retries")))
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let requests: Vec<_> = texts.iter().map(|t| self.embed_single(t)).collect();
        let vectors: Vec<Vec<f32>> = stream::iter(requests)
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        if let Some(first) = vectors.first() {
            let dims = first.len();
            if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
                return Err(RagError::provider(
                    None,
                    format!(
                        "embedding dimension changed within one batch: {} vs {}",
                        dims,
                        bad.len()
                    ),
                ));
            }
        }

        Ok(vectors)
    }
}

/// Create the appropriate [`EmbeddingProvider`] based on configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>, RagError> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        other => Err(RagError::Internal(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use retrieval_harness::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors, zero vectors, or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Euclidean (L2) distance. `f32::INFINITY` for vectors of different lengths.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_euclidean() {
        assert!((euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]) - 5.0).abs() < 1e-6);
        assert_eq!(euclidean_distance(&[1.0], &[1.0]), 0.0);
        assert!(euclidean_distance(&[1.0], &[1.0, 2.0]).is_infinite());
    }

    #[tokio::test]
    async fn test_disabled_provider_errors() {
        let err = DisabledProvider.embed_one("hello").await.unwrap_err();
        assert!(matches!(err, RagError::Provider { .. }));
    }

    #[test]
    fn test_create_provider() {
        let mut config = EmbeddingConfig::default();
        assert_eq!(create_provider(&config).unwrap().model_name(), "bge-m3:latest");
        config.provider = "disabled".to_string();
        assert_eq!(create_provider(&config).unwrap().model_name(), "disabled");
        config.provider = "nope".to_string();
        assert!(create_provider(&config).is_err());
    }
}
