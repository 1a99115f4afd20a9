//! Retrieval service shared by the HTTP surface and the CLI.
//!
//! [`RetrievalService`] owns the embedding provider and the vector index it
//! was constructed with and answers two kinds of queries:
//!
//! - [`search`](RetrievalService::search) — raw top-k hits, no filtering
//! - [`retrieve`](RetrievalService::retrieve) — external knowledge-base
//!   retrieval: defaults, score-threshold filtering and titles
//!
//! Both the query embedding and the index search run under
//! `retrieval.timeout_secs`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

use crate::config::{Config, RetrievalConfig};
use crate::embedding::{self, EmbeddingProvider};
use crate::error::RagError;
use crate::models::{Metadata, Record, SearchHit};
use crate::store::{Metric, SqliteIndex, VectorIndex};

/// Title used when an entry carries no usable `source` path.
pub const UNKNOWN_TITLE: &str = "unknown document";

/// Body of `POST /retrieval`. Every field is optional at the parsing layer
/// so that missing fields surface as validation errors, not parse errors.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetrievalRequest {
    #[serde(default)]
    pub knowledge_id: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub retrieval_setting: Option<RetrievalSetting>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct RetrievalSetting {
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub score_threshold: Option<f32>,
}

pub struct RetrievalService {
    provider: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    settings: RetrievalConfig,
}

impl RetrievalService {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        settings: RetrievalConfig,
    ) -> Self {
        Self {
            provider,
            index,
            settings,
        }
    }

    pub fn default_top_k(&self) -> usize {
        self.settings.default_top_k
    }

    /// Top `k` hits for `query`, best first. `k` is clamped to `max_top_k`.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, RagError> {
        if query.trim().is_empty() {
            return Err(RagError::validation("query must not be empty"));
        }
        if k == 0 {
            return Err(RagError::validation("k must be >= 1"));
        }
        let k = k.min(self.settings.max_top_k);

        let vector = self
            .with_deadline("query embedding", self.provider.embed_one(query))
            .await?;
        self.with_deadline(
            "index search",
            self.index.search(&vector, k, self.settings.metric),
        )
        .await
    }

    /// External knowledge-base retrieval.
    ///
    /// Keeps only hits that meet `score_threshold` under the configured
    /// metric (`>=` for cosine similarity, `<=` for euclidean distance).
    pub async fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<Record>, RagError> {
        let knowledge_id = non_empty(&request.knowledge_id);
        let query = non_empty(&request.query);
        let (Some(knowledge_id), Some(query)) = (knowledge_id, query) else {
            return Err(RagError::validation("knowledge_id and query are required"));
        };

        let setting = request.retrieval_setting.unwrap_or_default();
        let top_k = setting.top_k.unwrap_or(self.settings.default_top_k);
        let threshold = setting
            .score_threshold
            .unwrap_or(self.settings.default_score_threshold);
        if top_k == 0 {
            return Err(RagError::validation("retrieval_setting.top_k must be >= 1"));
        }

        let hits = self.search(query, top_k).await?;
        let records = filter_records(hits, threshold, self.settings.metric);
        tracing::debug!(
            knowledge_id,
            top_k,
            threshold,
            records = records.len(),
            "retrieval served"
        );
        Ok(records)
    }

    async fn with_deadline<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, RagError>>,
    ) -> Result<T, RagError> {
        let secs = self.settings.timeout_secs;
        tokio::time::timeout(Duration::from_secs(secs), fut)
            .await
            .map_err(|_| RagError::Timeout { operation, secs })?
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// Drop hits that miss `threshold` and shape the rest as [`Record`]s.
pub fn filter_records(hits: Vec<SearchHit>, threshold: f32, metric: Metric) -> Vec<Record> {
    hits.into_iter()
        .filter(|hit| metric.meets_threshold(hit.score, threshold))
        .map(|hit| Record {
            title: derive_title(&hit.metadata),
            content: hit.content,
            score: hit.score,
            metadata: hit.metadata,
        })
        .collect()
}

/// Last path segment of `metadata.source`, or [`UNKNOWN_TITLE`].
pub fn derive_title(metadata: &Metadata) -> String {
    metadata
        .get("source")
        .and_then(|v| v.as_str())
        .and_then(|source| source.rsplit(['/', '\\']).next())
        .filter(|title| !title.is_empty())
        .unwrap_or(UNKNOWN_TITLE)
        .to_string()
}

/// `kbr search`: query the local index and print the hits.
pub async fn run_search(config: &Config, query: &str, k: Option<usize>) -> Result<()> {
    let provider = embedding::create_provider(&config.embedding)?;
    let index = Arc::new(SqliteIndex::open(&config.db.path).await?);
    let service = RetrievalService::new(provider, index.clone(), config.retrieval.clone());

    let k = k.unwrap_or(service.default_top_k());
    let hits = service.search(query, k).await?;

    if hits.is_empty() {
        println!("No results.");
        index.close().await;
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!("{}. [{:.4}] {}", i + 1, hit.score, derive_title(&hit.metadata));
        if let Some(sheet) = hit.metadata.get("sheet") {
            println!("    sheet: {}", sheet);
        }
        let excerpt: String = hit.content.chars().take(240).collect();
        println!("    excerpt: \"{}\"", excerpt.replace('\n', " ").trim());
        println!();
    }

    index.close().await;
    Ok(())
}
