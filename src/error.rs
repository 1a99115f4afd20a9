//! Error taxonomy shared by the retrieval pipeline.
//!
//! Component seams (embedding, indexing, loading, HTTP) return [`RagError`];
//! command entry points wrap it in `anyhow`. Each variant knows the HTTP
//! status and the structured `error_code` it surfaces as.

use std::path::PathBuf;

use axum::http::StatusCode;
use thiserror::Error;

/// Errors produced by the retrieval pipeline.
#[derive(Debug, Error)]
pub enum RagError {
    /// `Authorization` header missing or not of the form `Bearer <token>`.
    #[error("invalid Authorization header format, expected 'Bearer <api key>'")]
    MalformedCredential,

    /// Well-formed bearer token that is not in the configured key set.
    #[error("authorization failed: unknown api key")]
    RejectedCredential,

    /// Missing or invalid request field, or an unparseable request body.
    #[error("{0}")]
    Validation(String),

    /// The embedding service did not report success.
    #[error("embedding provider error{}: {message}", .status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    Provider {
        status: Option<u16>,
        message: String,
    },

    /// Ingestion met a file extension no loader handles.
    #[error("unsupported file type: {}", .path.display())]
    UnsupportedFormat { path: PathBuf },

    /// A loader failed to read or decode a document.
    #[error("failed to load {}: {message}", .path.display())]
    Load { path: PathBuf, message: String },

    /// Vector index read/write failure or contract violation.
    #[error("vector index error: {0}")]
    Index(String),

    /// An operation exceeded its deadline.
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: &'static str, secs: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

impl RagError {
    pub fn provider(status: Option<u16>, message: impl Into<String>) -> Self {
        RagError::Provider {
            status,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        RagError::Validation(message.into())
    }

    pub fn index(message: impl Into<String>) -> Self {
        RagError::Index(message.into())
    }

    /// HTTP status used when this error crosses the request boundary.
    pub fn status(&self) -> StatusCode {
        match self {
            RagError::MalformedCredential | RagError::RejectedCredential => StatusCode::FORBIDDEN,
            RagError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Structured `error_code` of the external knowledge-base contract.
    pub fn error_code(&self) -> u32 {
        match self {
            RagError::MalformedCredential => 1001,
            RagError::RejectedCredential => 1002,
            other => u32::from(other.status().as_u16()),
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }
}

impl From<sqlx::Error> for RagError {
    fn from(err: sqlx::Error) -> Self {
        RagError::Index(err.to_string())
    }
}

impl From<reqwest::Error> for RagError {
    fn from(err: reqwest::Error) -> Self {
        RagError::Provider {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}
