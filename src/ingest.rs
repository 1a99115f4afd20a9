//! Ingestion pipeline orchestration.
//!
//! Drives load → chunk → embed → index → persist for every file in a source
//! directory. The run is all-or-nothing per file and fail-fast overall:
//!
//! - every entry's extension is checked before any file is processed, so an
//!   unsupported file aborts the run before anything is written;
//! - a file's chunks are all embedded before any of them is added, and the
//!   add itself is atomic, so a failure never leaves a partially indexed file;
//! - any load, embedding, or index error aborts the remaining files.
//!
//! Re-ingesting a file appends a second copy of its entries; use
//! [`rebuild_all`] (`kbr ingest --purge`) to start from an empty index.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::chunk::Chunker;
use crate::config::Config;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::RagError;
use crate::extract::{self, DocumentFormat};
use crate::store::{SqliteIndex, VectorIndex};

/// Counts reported at the end of an ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub files: usize,
    pub chunks: usize,
    pub skipped_entries: usize,
}

/// Files of a source directory that passed the upfront format check.
struct IngestPlan {
    files: Vec<PathBuf>,
    skipped_entries: usize,
}

/// Ingest every file of `source_dir` into `index`.
///
/// Files are processed in directory-listing order. Non-file entries are
/// skipped and counted in [`IngestStats::skipped_entries`].
pub async fn ingest_all(
    source_dir: &Path,
    chunker: &Chunker,
    provider: &dyn EmbeddingProvider,
    index: &dyn VectorIndex,
) -> Result<IngestStats, RagError> {
    let plan = plan_ingest(source_dir)?;
    process_files(plan, chunker, provider, index).await
}

/// Like [`ingest_all`], but empties `index` first.
///
/// The index is only cleared once the directory listing and format check
/// succeed, so a directory holding an unsupported file leaves it untouched.
pub async fn rebuild_all(
    source_dir: &Path,
    chunker: &Chunker,
    provider: &dyn EmbeddingProvider,
    index: &dyn VectorIndex,
) -> Result<IngestStats, RagError> {
    let plan = plan_ingest(source_dir)?;
    index.clear().await?;
    index.persist().await?;
    tracing::info!(dir = %source_dir.display(), "Cleared existing index entries");
    process_files(plan, chunker, provider, index).await
}

fn plan_ingest(source_dir: &Path) -> Result<IngestPlan, RagError> {
    let (files, skipped_entries) = list_source_files(source_dir)?;

    if let Some(unsupported) = files
        .iter()
        .find(|p| DocumentFormat::from_path(p).is_none())
    {
        return Err(RagError::UnsupportedFormat {
            path: unsupported.clone(),
        });
    }

    Ok(IngestPlan {
        files,
        skipped_entries,
    })
}

async fn process_files(
    plan: IngestPlan,
    chunker: &Chunker,
    provider: &dyn EmbeddingProvider,
    index: &dyn VectorIndex,
) -> Result<IngestStats, RagError> {
    let mut stats = IngestStats {
        skipped_entries: plan.skipped_entries,
        ..Default::default()
    };

    for path in plan.files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        tracing::info!(file = %name, "Processing file");

        let load_path = path.clone();
        let document = tokio::task::spawn_blocking(move || extract::load_document(&load_path))
            .await
            .map_err(|e| RagError::Internal(format!("loader task failed: {}", e)))??;

        let chunks = chunker.split(&document);
        if chunks.is_empty() {
            tracing::info!(file = %name, "No extractable text, skipping");
            continue;
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = provider.embed(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(RagError::provider(
                None,
                format!(
                    "provider returned {} vectors for {} texts",
                    vectors.len(),
                    chunks.len()
                ),
            ));
        }

        index.add(&chunks, &vectors).await?;
        index.persist().await?;

        stats.files += 1;
        stats.chunks += chunks.len();
        tracing::info!(file = %name, chunks = chunks.len(), "Finished processing");
    }

    Ok(stats)
}

/// Regular files of `dir` in listing order, plus the number of skipped entries.
fn list_source_files(dir: &Path) -> Result<(Vec<PathBuf>, usize), RagError> {
    let read_err = |e: std::io::Error| RagError::Load {
        path: dir.to_path_buf(),
        message: e.to_string(),
    };

    let mut files = Vec::new();
    let mut skipped = 0;
    for entry in std::fs::read_dir(dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        // `is_file` follows symlinks.
        if path.is_file() {
            files.push(path);
        } else {
            skipped += 1;
        }
    }
    Ok((files, skipped))
}

/// `kbr ingest`: ingest the configured source directory into the SQLite index.
pub async fn run_ingest(config: &Config, source_dir: Option<PathBuf>, purge: bool) -> Result<()> {
    let source_dir = source_dir.unwrap_or_else(|| config.ingest.source_dir.clone());
    let chunker = Chunker::from_config(&config.chunking)?;
    let provider = embedding::create_provider(&config.embedding)?;
    let index = SqliteIndex::open(&config.db.path).await?;

    let stats = if purge {
        rebuild_all(&source_dir, &chunker, provider.as_ref(), &index).await
    } else {
        ingest_all(&source_dir, &chunker, provider.as_ref(), &index).await
    }
    .with_context(|| format!("Ingestion of {} aborted", source_dir.display()))?;
    let total = index.count().await?;

    println!("ingest {}", source_dir.display());
    if purge {
        println!("  previous entries cleared");
    }
    println!("  files indexed: {}", stats.files);
    println!("  chunks written: {}", stats.chunks);
    println!("  entries skipped (not files): {}", stats.skipped_entries);
    println!("  index entries total: {}", total);
    println!("ok");

    index.close().await;
    Ok(())
}
