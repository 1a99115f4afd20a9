//! Retrieval HTTP server.
//!
//! Exposes the [`RetrievalService`] over a small JSON API. One of the
//! endpoints implements the external knowledge-base retrieval contract that
//! third-party orchestration platforms call with a bearer token.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/search?query=&k=` | Raw top-k hits |
//! | `POST` | `/retrieval` | Authenticated, threshold-filtered retrieval |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Every error response has the same shape:
//!
//! ```json
//! { "error_code": 1001, "error_msg": "invalid Authorization header format, expected 'Bearer <api key>'" }
//! ```
//!
//! | Status | error_code | When |
//! |--------|------------|------|
//! | 403 | 1001 | `Authorization` missing or not `Bearer <token>` |
//! | 403 | 1002 | token not in the configured key set |
//! | 400 | 400 | malformed JSON, missing or invalid fields |
//! | 500 | 500 | embedding, index or timeout failures |
//!
//! `/retrieval` checks credentials before it looks at the body.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{rejection::QueryRejection, Query, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::{Config, ServerConfig};
use crate::embedding;
use crate::error::RagError;
use crate::models::Record;
use crate::search::{RetrievalRequest, RetrievalService};
use crate::store::SqliteIndex;

/// Largest `/retrieval` body read after the credential check.
const MAX_RETRIEVAL_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RetrievalService>,
    pub keys: Arc<ApiKeys>,
}

/// Accepted bearer tokens, held as SHA-256 digests.
#[derive(Default)]
pub struct ApiKeys {
    digests: Vec<[u8; 32]>,
}

impl ApiKeys {
    /// Build a key set from plain tokens. Blank tokens are ignored.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let digests = keys
            .into_iter()
            .map(|k| k.as_ref().trim().to_string())
            .filter(|k| !k.is_empty())
            .map(|k| digest(&k))
            .collect();
        Self { digests }
    }

    /// Keys from `server.api_keys` plus the variable named by `server.api_key_env`.
    pub fn from_config(server: &ServerConfig) -> Self {
        let env_key = server
            .api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok());
        Self::new(server.api_keys.iter().cloned().chain(env_key))
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    /// Check an `Authorization` header value.
    pub fn authorize(&self, header: Option<&str>) -> Result<(), RagError> {
        let token = header
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(RagError::MalformedCredential)?;

        let candidate = digest(token);
        if self.digests.iter().any(|d| *d == candidate) {
            Ok(())
        } else {
            Err(RagError::RejectedCredential)
        }
    }
}

fn digest(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}

/// Build the router with all routes and layers attached.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/search", get(handle_search))
        .route("/retrieval", post(handle_retrieval))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Starts the retrieval server on `[server].bind`.
///
/// The embedding provider and the SQLite index are constructed once here and
/// shared by every request. Refuses to start without at least one API key.
/// Runs until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let keys = ApiKeys::from_config(&config.server);
    if keys.is_empty() {
        anyhow::bail!(
            "No API keys configured. Set server.api_keys or the {} environment variable.",
            config.server.api_key_env.as_deref().unwrap_or("KBR_API_KEY")
        );
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let index = Arc::new(SqliteIndex::open(&config.db.path).await?);
    let service = RetrievalService::new(provider, index.clone(), config.retrieval.clone());

    let state = AppState {
        service: Arc::new(service),
        keys: Arc::new(keys),
    };

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    println!("Retrieval server listening on http://{}", bind_addr);
    tracing::info!(
        bind = %bind_addr,
        keys = state.keys.len(),
        metric = ?config.retrieval.metric,
        "server started"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    index.close().await;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error_code: u32,
    error_msg: String,
}

/// Wraps [`RagError`] so handlers can return it with `?`.
struct AppError(RagError);

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = err.status();
        if err.is_client_error() {
            tracing::warn!(status = status.as_u16(), error = %err, "request rejected");
        } else {
            tracing::error!(status = status.as_u16(), error = %err, "request failed");
        }
        let body = ErrorBody {
            error_code: err.error_code(),
            error_msg: err.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /search ============

#[derive(Deserialize)]
struct SearchParams {
    query: Option<String>,
    k: Option<usize>,
}

#[derive(Serialize)]
struct SearchResult {
    content: String,
    score: f32,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
}

/// Handler for `GET /search`.
///
/// `k` defaults to `retrieval.default_top_k`. A missing `query` or a `k` that
/// is not a positive integer is a 400.
async fn handle_search(
    State(state): State<AppState>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<SearchResponse>, AppError> {
    let Query(params) = params.map_err(|e| RagError::validation(e.body_text()))?;
    let query = params
        .query
        .ok_or_else(|| RagError::validation("query is required"))?;
    let k = params.k.unwrap_or(state.service.default_top_k());

    let hits = state.service.search(&query, k).await?;
    let results = hits
        .into_iter()
        .map(|h| SearchResult {
            content: h.content,
            score: h.score,
        })
        .collect();

    Ok(Json(SearchResponse { results }))
}

// ============ POST /retrieval ============

#[derive(Serialize)]
struct RetrievalResponse {
    records: Vec<Record>,
}

/// Handler for `POST /retrieval`.
///
/// The body stream is only read once credentials pass, so a request without
/// a valid header gets 403 whatever its body contains, oversized ones included.
async fn handle_retrieval(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<RetrievalResponse>, AppError> {
    let auth = match headers.get(header::AUTHORIZATION) {
        Some(value) => Some(value.to_str().map_err(|_| RagError::MalformedCredential)?),
        None => None,
    };
    state.keys.authorize(auth)?;

    let body = axum::body::to_bytes(body, MAX_RETRIEVAL_BODY_BYTES)
        .await
        .map_err(|e| {
            RagError::validation(format!(
                "request body unreadable or larger than {} bytes: {}",
                MAX_RETRIEVAL_BODY_BYTES, e
            ))
        })?;

    let request: RetrievalRequest = serde_json::from_slice(&body)
        .map_err(|e| RagError::validation(format!("invalid JSON body: {}", e)))?;

    let records = state.service.retrieve(&request).await?;
    Ok(Json(RetrievalResponse { records }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorize_missing_or_malformed() {
        let keys = ApiKeys::new(["secret"]);
        for header in [None, Some(""), Some("secret"), Some("Basic secret"), Some("Bearer "), Some("bearer secret")] {
            assert!(
                matches!(keys.authorize(header), Err(RagError::MalformedCredential)),
                "{:?}",
                header
            );
        }
    }

    #[test]
    fn test_authorize_rejected_and_accepted() {
        let keys = ApiKeys::new(["secret", "  ", "other"]);
        assert_eq!(keys.len(), 2);
        assert!(matches!(
            keys.authorize(Some("Bearer wrong")),
            Err(RagError::RejectedCredential)
        ));
        assert!(keys.authorize(Some("Bearer secret")).is_ok());
        assert!(keys.authorize(Some("Bearer other")).is_ok());
    }

    #[test]
    fn test_empty_key_set_rejects_everything() {
        let keys = ApiKeys::default();
        assert!(keys.is_empty());
        assert!(matches!(
            keys.authorize(Some("Bearer anything")),
            Err(RagError::RejectedCredential)
        ));
    }

    #[test]
    fn test_from_config_reads_env() {
        let server = ServerConfig {
            bind: "127.0.0.1:0".to_string(),
            api_keys: vec!["from-file".to_string()],
            api_key_env: Some("KBR_TEST_SERVER_KEY_7F3A".to_string()),
        };
        std::env::set_var("KBR_TEST_SERVER_KEY_7F3A", "from-env");
        let keys = ApiKeys::from_config(&server);
        std::env::remove_var("KBR_TEST_SERVER_KEY_7F3A");
        assert_eq!(keys.len(), 2);
        assert!(keys.authorize(Some("Bearer from-env")).is_ok());
        assert!(keys.authorize(Some("Bearer from-file")).is_ok());
    }
}
