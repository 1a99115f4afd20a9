//! In-memory [`VectorIndex`] implementation for tests and embedded use.
//!
//! Entries live in a `Vec` behind a `tokio::sync::RwLock`: one writer or many
//! readers at a time. Search is brute-force over all stored vectors.
//! When opened with a snapshot path, [`persist`](VectorIndex::persist)
//! writes the entries to a JSON file and [`InMemoryIndex::open`] reloads them.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::RagError;
use crate::models::{Chunk, Metadata, SearchHit};

use super::{check_batch, check_query, top_k, Metric, VectorIndex};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    chunk_id: String,
    content: String,
    content_hash: String,
    metadata: Metadata,
    vector: Vec<f32>,
}

pub struct InMemoryIndex {
    entries: RwLock<Vec<StoredEntry>>,
    snapshot: Option<PathBuf>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            snapshot: None,
        }
    }

    /// Open an index backed by a JSON snapshot, loading it if it exists.
    pub fn open(snapshot: &Path) -> Result<Self, RagError> {
        let entries = if snapshot.exists() {
            let content = std::fs::read_to_string(snapshot)
                .map_err(|e| RagError::index(format!("read {}: {}", snapshot.display(), e)))?;
            serde_json::from_str(&content)
                .map_err(|e| RagError::index(format!("parse {}: {}", snapshot.display(), e)))?
        } else {
            Vec::new()
        };
        Ok(Self {
            entries: RwLock::new(entries),
            snapshot: Some(snapshot.to_path_buf()),
        })
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn stored_dims(entries: &[StoredEntry]) -> Option<usize> {
    entries.first().map(|e| e.vector.len())
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn add(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<(), RagError> {
        let mut entries = self.entries.write().await;
        check_batch(chunks, vectors, stored_dims(&entries))?;
        entries.extend(chunks.iter().zip(vectors.iter()).map(|(c, v)| StoredEntry {
            chunk_id: c.id.clone(),
            content: c.text.clone(),
            content_hash: c.hash.clone(),
            metadata: c.metadata.clone(),
            vector: v.clone(),
        }));
        Ok(())
    }

    async fn persist(&self) -> Result<(), RagError> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let entries = self.entries.read().await;
        let json = serde_json::to_vec(&*entries)
            .map_err(|e| RagError::index(format!("serialize snapshot: {}", e)))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RagError::index(e.to_string()))?;
        }
        // Write then rename so a crash never leaves a truncated snapshot.
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| RagError::index(format!("write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| RagError::index(format!("rename {}: {}", path.display(), e)))?;
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        metric: Metric,
    ) -> Result<Vec<SearchHit>, RagError> {
        let entries = self.entries.read().await;
        check_query(query, stored_dims(&entries))?;
        let hits = entries
            .iter()
            .map(|e| SearchHit {
                content: e.content.clone(),
                score: metric.score(query, &e.vector),
                metadata: e.metadata.clone(),
            })
            .collect();
        Ok(top_k(hits, k, metric))
    }

    async fn count(&self) -> Result<usize, RagError> {
        Ok(self.entries.read().await.len())
    }

    async fn clear(&self) -> Result<(), RagError> {
        self.entries.write().await.clear();
        Ok(())
    }
}
