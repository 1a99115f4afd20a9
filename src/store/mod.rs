//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait defines the storage operations the ingestion
//! pipeline and the retrieval service need, with two backends:
//!
//! - [`SqliteIndex`] — persisted entries in SQLite (WAL mode), brute-force scoring
//! - [`InMemoryIndex`] — `RwLock`-guarded entries with an optional JSON snapshot
//!
//! # Scoring
//!
//! The score direction is fixed by [`Metric`]:
//!
//! | Metric | Score | Better |
//! |--------|-------|--------|
//! | [`Metric::Cosine`] | cosine similarity in `[-1, 1]` | higher |
//! | [`Metric::Euclidean`] | L2 distance in `[0, ∞)` | lower |
//!
//! Threshold filtering goes through [`Metric::meets_threshold`] so the
//! comparison always matches the metric's direction.
//!
//! # Concurrency
//!
//! Both backends follow a single-writer / multiple-reader contract. The
//! SQLite backend relies on WAL snapshot isolation, so an ingestion process
//! can write while a server process reads; the in-memory backend takes an
//! explicit `tokio::sync::RwLock`.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryIndex;
pub use sqlite::SqliteIndex;

use std::cmp::Ordering;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::embedding::{cosine_similarity, euclidean_distance};
use crate::error::RagError;
use crate::models::{Chunk, SearchHit};

/// Distance/similarity function used to score index entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Cosine similarity, higher is better.
    #[default]
    Cosine,
    /// Euclidean distance, lower is better.
    Euclidean,
}

impl Metric {
    pub fn score(self, query: &[f32], entry: &[f32]) -> f32 {
        match self {
            Metric::Cosine => cosine_similarity(query, entry),
            Metric::Euclidean => euclidean_distance(query, entry),
        }
    }

    pub fn higher_is_better(self) -> bool {
        matches!(self, Metric::Cosine)
    }

    /// Ordering that sorts the best score first.
    pub fn best_first(self, a: f32, b: f32) -> Ordering {
        let ord = a.partial_cmp(&b).unwrap_or(Ordering::Equal);
        if self.higher_is_better() {
            ord.reverse()
        } else {
            ord
        }
    }

    /// `score >= threshold` for similarities, `score <= threshold` for distances.
    pub fn meets_threshold(self, score: f32, threshold: f32) -> bool {
        if self.higher_is_better() {
            score >= threshold
        } else {
            score <= threshold
        }
    }
}

/// Abstract vector storage backend.
///
/// Entries are `(vector, chunk text, metadata)` triples identified only by
/// insertion order; adding the same chunk twice stores it twice.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`add`](VectorIndex::add) | Append chunks with their vectors |
/// | [`persist`](VectorIndex::persist) | Flush to durable storage (idempotent) |
/// | [`search`](VectorIndex::search) | k nearest entries, best first |
/// | [`count`](VectorIndex::count) | Number of stored entries |
/// | [`clear`](VectorIndex::clear) | Remove every entry |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Append entries. `chunks` and `vectors` must have the same length and
    /// every vector must match the dimension of entries already stored.
    /// Either all entries are added or none are.
    async fn add(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<(), RagError>;

    async fn persist(&self) -> Result<(), RagError>;

    /// Return up to `k` entries ordered best-first under `metric`. An empty
    /// index yields an empty result.
    async fn search(
        &self,
        query: &[f32],
        k: usize,
        metric: Metric,
    ) -> Result<Vec<SearchHit>, RagError>;

    async fn count(&self) -> Result<usize, RagError>;

    async fn clear(&self) -> Result<(), RagError>;
}

/// Check an `add` batch and return its vector dimension.
pub(crate) fn check_batch(
    chunks: &[Chunk],
    vectors: &[Vec<f32>],
    stored_dims: Option<usize>,
) -> Result<Option<usize>, RagError> {
    if chunks.len() != vectors.len() {
        return Err(RagError::index(format!(
            "add called with {} chunks but {} vectors",
            chunks.len(),
            vectors.len()
        )));
    }
    let Some(first) = vectors.first() else {
        return Ok(None);
    };
    let dims = first.len();
    if dims == 0 {
        return Err(RagError::index("cannot index an empty vector"));
    }
    if vectors.iter().any(|v| v.len() != dims) {
        return Err(RagError::index("vectors in one batch have mixed dimensions"));
    }
    if let Some(stored) = stored_dims {
        if stored != dims {
            return Err(RagError::index(format!(
                "vector dimension {} does not match index dimension {}",
                dims, stored
            )));
        }
    }
    Ok(Some(dims))
}

pub(crate) fn check_query(query: &[f32], stored_dims: Option<usize>) -> Result<(), RagError> {
    match stored_dims {
        Some(stored) if stored != query.len() => Err(RagError::index(format!(
            "query dimension {} does not match index dimension {}",
            query.len(),
            stored
        ))),
        _ => Ok(()),
    }
}

/// Sort scored hits best-first and keep the top `k`.
pub(crate) fn top_k(mut hits: Vec<SearchHit>, k: usize, metric: Metric) -> Vec<SearchHit> {
    hits.sort_by(|a, b| metric.best_first(a.score, b.score));
    hits.truncate(k);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_direction() {
        let m = Metric::Cosine;
        assert!(m.higher_is_better());
        assert_eq!(m.best_first(0.9, 0.1), Ordering::Less);
        assert!(m.meets_threshold(0.5, 0.5));
        assert!(m.meets_threshold(0.7, 0.5));
        assert!(!m.meets_threshold(0.4, 0.5));
    }

    #[test]
    fn test_euclidean_direction() {
        let m = Metric::Euclidean;
        assert!(!m.higher_is_better());
        assert_eq!(m.best_first(0.1, 0.9), Ordering::Less);
        assert!(m.meets_threshold(0.3, 0.5));
        assert!(!m.meets_threshold(0.7, 0.5));
    }

    #[test]
    fn test_threshold_monotonic() {
        let scores = [-0.4f32, 0.0, 0.2, 0.5, 0.51, 0.9, 1.0];
        for metric in [Metric::Cosine, Metric::Euclidean] {
            let thresholds: Vec<f32> = if metric.higher_is_better() {
                vec![-1.0, 0.0, 0.5, 0.9, 1.1]
            } else {
                vec![2.0, 0.9, 0.5, 0.0, -0.1]
            };
            let counts: Vec<usize> = thresholds
                .iter()
                .map(|t| scores.iter().filter(|s| metric.meets_threshold(**s, *t)).count())
                .collect();
            assert!(counts.windows(2).all(|w| w[1] <= w[0]), "{:?}", counts);
        }
    }

    #[test]
    fn test_check_batch() {
        assert!(check_batch(&[], &[vec![1.0]], None).is_err());
        assert_eq!(check_batch(&[], &[], Some(3)).unwrap(), None);
    }

    #[test]
    fn test_check_query() {
        assert!(check_query(&[1.0, 2.0], Some(3)).is_err());
        assert!(check_query(&[1.0, 2.0], Some(2)).is_ok());
        assert!(check_query(&[1.0, 2.0], None).is_ok());
    }
}
