//! Recall@k evaluation against a running `/search` endpoint.
//!
//! Questions come from markdown pipe tables with a question column and a gold
//! answer column. Each question is sent once with `k = max(top_ks)`; a
//! question counts as a hit at `k` when the first `prefix_chars` characters
//! of its gold answer appear verbatim in any of the first `k` results.
//!
//! ```text
//! | 问题 | 黄金答案 |
//! |------|----------|
//! | What is the minimum insulation resistance? | 100 Ω/V for DC circuits ... |
//! ```
//!
//! A failed request does not abort the run: the row records all hits as
//! false and keeps the error text.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::config::Config;

const QUESTION_HEADERS: [&str; 3] = ["question", "query", "问题"];
const GOLD_HEADERS: [&str; 3] = ["gold_answer", "answer", "黄金答案"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub question: String,
    pub gold_answer: String,
}

/// Outcome for one question. Serializes hits as `Top{k}_hit` keys.
#[derive(Debug, Clone)]
pub struct EvalRow {
    pub question: String,
    pub gold_answer: String,
    pub hits: BTreeMap<usize, bool>,
    pub error: Option<String>,
}

impl Serialize for EvalRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("question", &self.question)?;
        map.serialize_entry("gold_answer", &self.gold_answer)?;
        for (k, hit) in &self.hits {
            map.serialize_entry(&format!("Top{}_hit", k), hit)?;
        }
        if let Some(error) = &self.error {
            map.serialize_entry("error", error)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    pub endpoint: String,
    pub generated_at: DateTime<Utc>,
    pub rows: Vec<EvalRow>,
    /// k → fraction of questions hit at k.
    pub recall: BTreeMap<usize, f64>,
}

/// Extract questions from every pipe table in `markdown`.
///
/// Tables without a recognised question and gold-answer column are ignored,
/// as are rows whose cell count differs from the header and rows with an
/// empty gold answer.
pub fn parse_question_table(markdown: &str) -> Vec<Question> {
    let mut tables: Vec<Vec<Vec<String>>> = Vec::new();
    let mut current: Vec<Vec<String>> = Vec::new();

    for line in markdown.lines() {
        let line = line.trim();
        if line.starts_with('|') {
            current.push(split_row(line));
        } else if !current.is_empty() {
            tables.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tables.push(current);
    }

    let mut questions = Vec::new();
    for table in tables {
        let Some((header, rows)) = table.split_first() else {
            continue;
        };
        let (Some(q_col), Some(g_col)) = (
            find_column(header, &QUESTION_HEADERS),
            find_column(header, &GOLD_HEADERS),
        ) else {
            continue;
        };

        for row in rows {
            if row.len() != header.len() || is_separator(row) {
                continue;
            }
            if row[g_col].is_empty() {
                continue;
            }
            questions.push(Question {
                question: row[q_col].clone(),
                gold_answer: row[g_col].clone(),
            });
        }
    }
    questions
}

fn split_row(line: &str) -> Vec<String> {
    let inner = line.strip_prefix('|').unwrap_or(line);
    let inner = inner.strip_suffix('|').unwrap_or(inner);
    inner.split('|').map(|c| c.trim().to_string()).collect()
}

fn is_separator(row: &[String]) -> bool {
    row.iter()
        .all(|c| !c.is_empty() && c.chars().all(|ch| matches!(ch, '-' | ':' | ' ')))
}

fn find_column(header: &[String], aliases: &[&str]) -> Option<usize> {
    header
        .iter()
        .position(|h| aliases.iter().any(|a| h.eq_ignore_ascii_case(a)))
}

/// True when the gold answer's first `prefix_chars` characters occur in any
/// of the first `k` contents.
pub fn is_hit(gold_answer: &str, contents: &[String], k: usize, prefix_chars: usize) -> bool {
    let prefix: String = gold_answer.chars().take(prefix_chars).collect();
    contents.iter().take(k).any(|c| c.contains(&prefix))
}

#[derive(Deserialize)]
struct SearchBody {
    results: Vec<SearchItem>,
}

#[derive(Deserialize)]
struct SearchItem {
    content: String,
}

/// Run every question against `endpoint` and compute recall at each k.
pub async fn evaluate(
    questions: &[Question],
    endpoint: &str,
    top_ks: &[usize],
    prefix_chars: usize,
) -> Result<EvalReport> {
    let ks: BTreeSet<usize> = top_ks.iter().copied().collect();
    let max_k = match ks.last() {
        Some(&k) if k > 0 && !ks.contains(&0) => k,
        _ => anyhow::bail!("top_ks must be a non-empty list of values >= 1"),
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("Failed to build HTTP client")?;

    let mut rows = Vec::with_capacity(questions.len());
    for q in questions {
        let (hits, error) = match fetch_contents(&client, endpoint, &q.question, max_k).await {
            Ok(contents) => {
                let hits = ks
                    .iter()
                    .map(|&k| (k, is_hit(&q.gold_answer, &contents, k, prefix_chars)))
                    .collect();
                (hits, None)
            }
            Err(e) => {
                tracing::warn!(question = %q.question, error = %e, "search request failed");
                (ks.iter().map(|&k| (k, false)).collect(), Some(e.to_string()))
            }
        };
        rows.push(EvalRow {
            question: q.question.clone(),
            gold_answer: q.gold_answer.clone(),
            hits,
            error,
        });
    }

    let recall = ks.iter().map(|&k| (k, recall_at(&rows, k))).collect();

    Ok(EvalReport {
        endpoint: endpoint.to_string(),
        generated_at: Utc::now(),
        rows,
        recall,
    })
}

async fn fetch_contents(
    client: &reqwest::Client,
    endpoint: &str,
    query: &str,
    k: usize,
) -> Result<Vec<String>, reqwest::Error> {
    let k = k.to_string();
    let body: SearchBody = client
        .get(endpoint)
        .query(&[("query", query), ("k", k.as_str())])
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(body.results.into_iter().map(|r| r.content).collect())
}

/// Mean hit rate at `k`; 0.0 when there are no rows.
fn recall_at(rows: &[EvalRow], k: usize) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    let hits = rows
        .iter()
        .filter(|r| r.hits.get(&k).copied().unwrap_or(false))
        .count();
    hits as f64 / rows.len() as f64
}

/// Save `report` to `path`.
///
/// A `.csv` path gets one row per question (`question`, `gold_answer`, one
/// `Top{k}_hit` column per k, `error`); anything else gets the full report as
/// pretty JSON.
pub fn write_report(report: &EvalReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
    if is_csv {
        return write_csv_rows(report, path)
            .with_context(|| format!("Failed to write report: {}", path.display()));
    }

    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report: {}", path.display()))?;
    Ok(())
}

fn write_csv_rows(report: &EvalReport, path: &Path) -> Result<()> {
    let ks: BTreeSet<usize> = report
        .recall
        .keys()
        .copied()
        .chain(report.rows.iter().flat_map(|r| r.hits.keys().copied()))
        .collect();

    let mut writer = csv::Writer::from_path(path)?;
    let mut header = vec!["question".to_string(), "gold_answer".to_string()];
    header.extend(ks.iter().map(|k| format!("Top{}_hit", k)));
    header.push("error".to_string());
    writer.write_record(&header)?;

    for row in &report.rows {
        let mut record = vec![row.question.clone(), row.gold_answer.clone()];
        record.extend(
            ks.iter()
                .map(|k| row.hits.get(k).copied().unwrap_or(false).to_string()),
        );
        record.push(row.error.clone().unwrap_or_default());
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// `kbr eval`: evaluate a question file and save the report.
pub async fn run_eval(
    config: &Config,
    questions_path: &Path,
    endpoint: Option<String>,
    top_ks: Option<Vec<usize>>,
    output: Option<PathBuf>,
) -> Result<()> {
    let markdown = std::fs::read_to_string(questions_path)
        .with_context(|| format!("Failed to read {}", questions_path.display()))?;
    let questions = parse_question_table(&markdown);
    if questions.is_empty() {
        println!("No questions with gold answers found in {}", questions_path.display());
    }

    let endpoint = endpoint.unwrap_or_else(|| config.eval.endpoint.clone());
    let top_ks = top_ks.unwrap_or_else(|| config.eval.top_ks.clone());
    let output = output.unwrap_or_else(|| config.eval.output.clone());

    let report = evaluate(&questions, &endpoint, &top_ks, config.eval.prefix_chars).await?;

    for (i, row) in report.rows.iter().enumerate() {
        let marks: Vec<String> = row
            .hits
            .iter()
            .map(|(k, hit)| format!("Top{}={}", k, if *hit { "✓" } else { "✗" }))
            .collect();
        let question: String = row.question.chars().take(48).collect();
        print!("{:>3}. {:<48}  {}", i + 1, question, marks.join("  "));
        match &row.error {
            Some(e) => println!("  error: {}", e),
            None => println!(),
        }
    }

    println!();
    for (k, recall) in &report.recall {
        println!("Top{} recall: {:.3}", k, recall);
    }

    write_report(&report, &output)?;
    println!();
    println!("Report written to {}", output.display());
    Ok(())
}
