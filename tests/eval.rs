//! Evaluation harness against a live `/search` endpoint.

mod common;

use std::sync::Arc;

use retrieval_harness::config::RetrievalConfig;
use retrieval_harness::eval::{evaluate, parse_question_table, Question};
use retrieval_harness::models::{Chunk, Metadata};
use retrieval_harness::store::{InMemoryIndex, VectorIndex};

use common::{spawn_app, KeywordProvider};

const TEXTS: [&str; 3] = [
    "battery enclosure shall withstand a 50 g mechanical shock",
    "insulation resistance shall be at least 100 ohm per volt",
    "alpha beta gamma",
];

async fn search_endpoint() -> String {
    let index = Arc::new(InMemoryIndex::new());
    let chunks: Vec<Chunk> = TEXTS
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let mut metadata = Metadata::new();
            metadata.insert("source".to_string(), "docs/standard.txt".into());
            Chunk {
                id: format!("c{}", i),
                text: t.to_string(),
                start: 0,
                end: t.chars().count(),
                hash: String::new(),
                metadata,
            }
        })
        .collect();
    let vectors: Vec<Vec<f32>> = TEXTS.iter().map(|t| KeywordProvider::vector(t)).collect();
    index.add(&chunks, &vectors).await.unwrap();
    let base = spawn_app(index, RetrievalConfig::default()).await;
    format!("{}/search", base)
}

fn question(q: &str, gold: &str) -> Question {
    Question {
        question: q.to_string(),
        gold_answer: gold.to_string(),
    }
}

#[tokio::test]
async fn test_missed_question_has_zero_recall() {
    let endpoint = search_endpoint().await;
    let questions = vec![question(
        "what about the battery?",
        "thermal runaway warning within 5 minutes",
    )];

    let report = evaluate(&questions, &endpoint, &[1, 3, 5], 10).await.unwrap();
    assert_eq!(report.rows.len(), 1);
    assert_eq!(report.rows[0].hits[&5], false);
    assert!(report.rows[0].error.is_none());
    assert_eq!(report.recall[&5], 0.0);
    assert_eq!(report.recall[&1], 0.0);
}

#[tokio::test]
async fn test_hits_and_recall_per_k() {
    let endpoint = search_endpoint().await;
    let questions = vec![
        question("insulation requirement", "insulation resistance ≥ 100 Ω/V"),
        question("battery shock", "battery enclosure must survive"),
        question("alpha", "not present anywhere"),
        question("gamma", "alpha beta gamma"),
    ];

    let report = evaluate(&questions, &endpoint, &[1, 3], 10).await.unwrap();
    let value = serde_json::to_value(&report).unwrap();

    assert_eq!(value["rows"][0]["Top1_hit"], true);
    assert_eq!(value["rows"][1]["Top1_hit"], true);
    assert_eq!(value["rows"][2]["Top3_hit"], false);
    assert_eq!(value["rows"][3]["Top1_hit"], true);
    assert_eq!(report.recall[&1], 0.75);
    assert_eq!(report.recall[&3], 0.75);
}

#[tokio::test]
async fn test_parsed_table_round_trip_through_endpoint() {
    let endpoint = search_endpoint().await;
    let markdown = "\
| 问题 | 黄金答案 |
|------|----------|
| insulation | insulation resistance shall be at least 100 |
";
    let questions = parse_question_table(markdown);
    assert_eq!(questions.len(), 1);
    let report = evaluate(&questions, &endpoint, &[5], 10).await.unwrap();
    assert_eq!(report.recall[&5], 1.0);
}

#[tokio::test]
async fn test_unreachable_endpoint_records_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let questions = vec![question("battery", "battery enclosure")];
    let endpoint = format!("http://{}/search", addr);
    let report = evaluate(&questions, &endpoint, &[1, 5], 10).await.unwrap();

    let row = &report.rows[0];
    assert!(row.hits.values().all(|hit| !hit));
    assert!(row.error.is_some());
    assert_eq!(report.recall[&5], 0.0);
}

#[tokio::test]
async fn test_error_status_records_error() {
    let endpoint = search_endpoint().await;
    // Blank question is rejected by /search with 400.
    let questions = vec![question(" ", "alpha beta gamma")];
    let report = evaluate(&questions, &endpoint, &[1], 10).await.unwrap();
    assert!(report.rows[0].error.as_deref().unwrap().contains("400"));
    assert_eq!(report.rows[0].hits[&1], false);
}
