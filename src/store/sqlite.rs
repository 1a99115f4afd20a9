//! SQLite-backed [`VectorIndex`] implementation.
//!
//! Entries are rows of `index_entries`, vectors stored as little-endian `f32`
//! BLOBs. Search loads every vector and scores it in Rust. Each `add` runs in
//! one transaction, so a batch is either fully visible to readers or not at
//! all; WAL mode lets readers proceed while a writer commits.

use std::path::Path;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::db;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::RagError;
use crate::migrate;
use crate::models::{Chunk, Metadata, SearchHit};

use super::{check_batch, check_query, top_k, Metric, VectorIndex};

pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the database at `path`, creating the schema if needed.
    pub async fn open(path: &Path) -> Result<Self, RagError> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Dimension of the stored vectors, if any entry exists.
    pub async fn dims(&self) -> Result<Option<usize>, RagError> {
        let dims: Option<i64> = sqlx::query_scalar("SELECT dims FROM index_entries LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(dims.map(|d| d as usize))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn add(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<(), RagError> {
        let mut tx = self.pool.begin().await?;

        let stored: Option<i64> = sqlx::query_scalar("SELECT dims FROM index_entries LIMIT 1")
            .fetch_optional(&mut *tx)
            .await?;
        let Some(dims) = check_batch(chunks, vectors, stored.map(|d| d as usize))? else {
            return Ok(());
        };

        let now = chrono::Utc::now().timestamp();
        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            let metadata_json = serde_json::to_string(&chunk.metadata)
                .map_err(|e| RagError::index(format!("encode metadata: {}", e)))?;
            sqlx::query(
                r#"
                INSERT INTO index_entries
                    (chunk_id, content, content_hash, metadata_json, dims, embedding, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .bind(metadata_json)
            .bind(dims as i64)
            .bind(vec_to_blob(vector))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn persist(&self) -> Result<(), RagError> {
        // Commits are already durable; fold the WAL back into the main file.
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        metric: Metric,
    ) -> Result<Vec<SearchHit>, RagError> {
        let rows = sqlx::query(
            "SELECT content, metadata_json, dims, embedding FROM index_entries ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        let stored = rows.first().map(|row| row.get::<i64, _>("dims") as usize);
        check_query(query, stored)?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let metadata_json: String = row.get("metadata_json");
            let metadata: Metadata = serde_json::from_str(&metadata_json)
                .map_err(|e| RagError::index(format!("decode metadata: {}", e)))?;
            hits.push(SearchHit {
                content: row.get("content"),
                score: metric.score(query, &blob_to_vec(&blob)),
                metadata,
            });
        }

        Ok(top_k(hits, k, metric))
    }

    async fn count(&self) -> Result<usize, RagError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn clear(&self) -> Result<(), RagError> {
        sqlx::query("DELETE FROM index_entries")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
