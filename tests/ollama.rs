//! `OllamaProvider` against a mock embedding service.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use retrieval_harness::config::EmbeddingConfig;
use retrieval_harness::embedding::{EmbeddingProvider, OllamaProvider};
use retrieval_harness::error::RagError;
use serde_json::{json, Value};

#[derive(Clone, Copy)]
enum Mode {
    /// `[len(prompt), 1.0]`, answering long prompts first.
    Echo,
    /// 503 for the first two calls, then echo.
    FlakyTwice,
    AlwaysError(u16),
    EmptyVector,
}

#[derive(Clone)]
struct MockState {
    mode: Mode,
    calls: Arc<AtomicUsize>,
}

async fn handle_embeddings(
    State(state): State<MockState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let call = state.calls.fetch_add(1, Ordering::SeqCst);
    assert_eq!(body["model"], "bge-m3:latest");
    let prompt = body["prompt"].as_str().unwrap_or_default().to_string();
    let len = prompt.chars().count();

    match state.mode {
        Mode::Echo => {
            tokio::time::sleep(Duration::from_millis(50u64.saturating_sub(len as u64 * 5))).await;
            (StatusCode::OK, Json(json!({ "embedding": [len as f32, 1.0] })))
        }
        Mode::FlakyTwice if call < 2 => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "model loading" })),
        ),
        Mode::FlakyTwice => (StatusCode::OK, Json(json!({ "embedding": [len as f32, 1.0] }))),
        Mode::AlwaysError(code) => (
            StatusCode::from_u16(code).unwrap(),
            Json(json!({ "error": "boom" })),
        ),
        Mode::EmptyVector => (StatusCode::OK, Json(json!({ "embedding": [] }))),
    }
}

async fn spawn_mock(mode: Mode) -> (String, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let state = MockState {
        mode,
        calls: calls.clone(),
    };
    let app = Router::new()
        .route("/api/embeddings", post(handle_embeddings))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    (format!("http://{}/", addr), calls)
}

fn provider(base_url: &str, max_retries: u32) -> OllamaProvider {
    let config = EmbeddingConfig {
        base_url: base_url.to_string(),
        max_retries,
        retry_backoff_ms: 1,
        concurrency: 4,
        timeout_secs: 5,
        ..EmbeddingConfig::default()
    };
    OllamaProvider::new(&config).unwrap()
}

#[tokio::test]
async fn test_embed_preserves_order_and_count() {
    let (url, calls) = spawn_mock(Mode::Echo).await;
    let provider = provider(&url, 0);

    let texts: Vec<String> = (1..=8).map(|n| "x".repeat(n)).collect();
    let vectors = provider.embed(&texts).await.unwrap();

    assert_eq!(vectors.len(), texts.len());
    for (i, v) in vectors.iter().enumerate() {
        assert_eq!(v, &vec![(i + 1) as f32, 1.0]);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 8);
    assert_eq!(provider.model_name(), "bge-m3:latest");
}

#[tokio::test]
async fn test_embed_runs_on_spawned_task() {
    let (url, _) = spawn_mock(Mode::Echo).await;
    let provider: Arc<dyn EmbeddingProvider> = Arc::new(provider(&url, 0));

    let texts: Vec<String> = vec!["ab".into(), "abc".into()];
    let vectors = tokio::spawn(async move { provider.embed(&texts).await })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(vectors, vec![vec![2.0, 1.0], vec![3.0, 1.0]]);
}

#[tokio::test]
async fn test_embed_one() {
    let (url, _) = spawn_mock(Mode::Echo).await;
    let v = provider(&url, 0).embed_one("beta").await.unwrap();
    assert_eq!(v, vec![4.0, 1.0]);
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let (url, calls) = spawn_mock(Mode::FlakyTwice).await;
    let v = provider(&url, 3).embed_one("abc").await.unwrap();
    assert_eq!(v, vec![3.0, 1.0]);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_persistent_500_is_provider_error() {
    let (url, calls) = spawn_mock(Mode::AlwaysError(500)).await;
    let err = provider(&url, 2).embed_one("abc").await.unwrap_err();
    assert!(matches!(err, RagError::Provider { status: Some(500), .. }), "{:?}", err);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_client_errors_fail_immediately() {
    let (url, calls) = spawn_mock(Mode::AlwaysError(404)).await;
    let err = provider(&url, 3).embed_one("abc").await.unwrap_err();
    assert!(matches!(err, RagError::Provider { status: Some(404), .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_empty_vector_is_provider_error() {
    let (url, _) = spawn_mock(Mode::EmptyVector).await;
    let err = provider(&url, 0).embed_one("abc").await.unwrap_err();
    assert!(matches!(err, RagError::Provider { .. }));
}

#[tokio::test]
async fn test_unreachable_service_is_provider_error() {
    // Bind then drop to get a port nothing listens on.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = provider(&format!("http://{}", addr), 1)
        .embed_one("abc")
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Provider { status: None, .. }));
}
