//! # Retrieval Harness
//!
//! Document ingestion, vector indexing and retrieval for retrieval-augmented
//! generation.
//!
//! Files from a source directory are loaded, split into overlapping chunks,
//! embedded through a remote embedding service and stored in a persisted
//! vector index. An HTTP service answers nearest-neighbour queries, including
//! an authenticated external knowledge-base retrieval endpoint, and an
//! evaluation harness measures recall@k against a question set.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────────┐   ┌──────────────┐
//! │ source dir  │──▶│ load ▸ chunk ▸  │──▶│ VectorIndex  │
//! │ pdf/xlsx/md │   │ embed (Ollama)  │   │ SQLite (WAL) │
//! └─────────────┘   └─────────────────┘   └──────┬───────┘
//!                                                │
//!                         ┌──────────────────────┤
//!                         ▼                      ▼
//!                   ┌──────────┐          ┌─────────────┐
//!                   │   CLI    │          │    HTTP     │
//!                   │  (kbr)   │          │ /retrieval  │
//!                   └──────────┘          └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kbr init                          # create the index database
//! kbr ingest                        # index ./data/docs
//! kbr search "insulation resistance"
//! KBR_API_KEY=secret kbr serve      # start the HTTP server
//! kbr eval questions.md             # recall@1/3/5 against /search
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy and HTTP mapping |
//! | [`models`] | Core data types |
//! | [`extract`] | PDF, XLSX, XLS and plain-text loading |
//! | [`chunk`] | Boundary-preferring text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Vector index trait, metrics and backends |
//! | [`ingest`] | Ingestion pipeline |
//! | [`search`] | Retrieval service |
//! | [`server`] | HTTP server |
//! | [`eval`] | Recall@k evaluation |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod eval;
pub mod extract;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod search;
pub mod server;
pub mod stats;
pub mod store;
