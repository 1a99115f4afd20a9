//! Shared helpers for the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use retrieval_harness::config::RetrievalConfig;
use retrieval_harness::embedding::EmbeddingProvider;
use retrieval_harness::error::RagError;
use retrieval_harness::search::RetrievalService;
use retrieval_harness::server::{router, ApiKeys, AppState};
use retrieval_harness::store::VectorIndex;

pub const API_KEY: &str = "test-key-0123";

/// Deterministic bag-of-words embedding over a fixed vocabulary.
///
/// Dimension `i` counts occurrences of `VOCAB[i]`; the last dimension is a
/// constant so no text maps to the zero vector.
pub struct KeywordProvider {
    pub calls: AtomicUsize,
}

pub const VOCAB: [&str; 6] = ["alpha", "beta", "gamma", "delta", "battery", "insulation"];

impl KeywordProvider {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let mut v: Vec<f32> = VOCAB
            .iter()
            .map(|term| words.iter().filter(|w| *w == term).count() as f32)
            .collect();
        v.push(0.01);
        v
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordProvider {
    fn model_name(&self) -> &str {
        "keyword"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

/// Fails every call the way an unreachable embedding service would.
pub struct FailingProvider;

#[async_trait]
impl EmbeddingProvider for FailingProvider {
    fn model_name(&self) -> &str {
        "failing"
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        Err(RagError::provider(Some(503), "service unavailable"))
    }
}

/// Serve the retrieval router on an ephemeral port; returns its base URL.
pub async fn spawn_app(index: Arc<dyn VectorIndex>, settings: RetrievalConfig) -> String {
    let service = RetrievalService::new(Arc::new(KeywordProvider::new()), index, settings);
    let state = AppState {
        service: Arc::new(service),
        keys: Arc::new(ApiKeys::new([API_KEY])),
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.ok();
    });
    format!("http://{}", addr)
}
