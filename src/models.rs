//! Core data models used throughout the retrieval pipeline.
//!
//! These types represent the documents, chunks, and search results that flow
//! from ingestion through the vector index to the HTTP surface.

use std::path::PathBuf;

use serde::Serialize;
use serde_json::{Map, Value};

/// Metadata attached to segments, chunks and index entries.
pub type Metadata = Map<String, Value>;

/// A source file after loading, before chunking.
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    pub format: crate::extract::DocumentFormat,
    pub segments: Vec<Segment>,
}

/// A raw text span produced by a loader (a whole PDF, one worksheet, ...).
#[derive(Debug, Clone)]
pub struct Segment {
    pub text: String,
    pub metadata: Metadata,
}

/// A contiguous span of segment text prepared for embedding.
///
/// `start` and `end` are character offsets into the segment text; `text` is
/// exactly that slice, so consecutive chunks can be stitched back together.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub hash: String,
    pub metadata: Metadata,
}

/// A single nearest-neighbor result from the vector index.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub content: String,
    pub score: f32,
    pub metadata: Metadata,
}

/// A filtered result in the external knowledge-base response shape.
#[derive(Debug, Clone, Serialize)]
pub struct Record {
    pub content: String,
    pub score: f32,
    pub title: String,
    pub metadata: Metadata,
}
