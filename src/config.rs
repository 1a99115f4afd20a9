use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::store::Metric;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub eval: EvalConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Chunk sizes are counted in characters.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    512
}
fn default_chunk_overlap() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: default_base_url(),
            timeout_secs: default_embed_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_provider() -> String {
    "ollama".to_string()
}
fn default_model() -> String {
    "bge-m3:latest".to_string()
}
fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_embed_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    500
}
fn default_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default)]
    pub metric: Metric,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(default = "default_score_threshold")]
    pub default_score_threshold: f32,
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
    #[serde(default = "default_retrieval_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            metric: Metric::default(),
            default_top_k: default_top_k(),
            default_score_threshold: default_score_threshold(),
            max_top_k: default_max_top_k(),
            timeout_secs: default_retrieval_timeout_secs(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_score_threshold() -> f32 {
    0.5
}
fn default_max_top_k() -> usize {
    100
}
fn default_retrieval_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            api_keys: Vec::new(),
            api_key_env: default_api_key_env(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8001".to_string()
}
fn default_api_key_env() -> Option<String> {
    Some("KBR_API_KEY".to_string())
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            source_dir: default_source_dir(),
        }
    }
}

fn default_source_dir() -> PathBuf {
    PathBuf::from("./data/docs")
}

#[derive(Debug, Deserialize, Clone)]
pub struct EvalConfig {
    #[serde(default = "default_eval_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_top_ks")]
    pub top_ks: Vec<usize>,
    #[serde(default = "default_prefix_chars")]
    pub prefix_chars: usize,
    #[serde(default = "default_eval_output")]
    pub output: PathBuf,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            endpoint: default_eval_endpoint(),
            top_ks: default_top_ks(),
            prefix_chars: default_prefix_chars(),
            output: default_eval_output(),
        }
    }
}

fn default_eval_endpoint() -> String {
    "http://127.0.0.1:8001/search".to_string()
}
fn default_top_ks() -> Vec<usize> {
    vec![1, 3, 5]
}
fn default_prefix_chars() -> usize {
    10
}
fn default_eval_output() -> PathBuf {
    PathBuf::from("./data/eval_report.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be < chunking.chunk_size");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or ollama.",
            other
        ),
    }
    if config.embedding.concurrency == 0 {
        anyhow::bail!("embedding.concurrency must be >= 1");
    }

    // Validate retrieval
    if config.retrieval.default_top_k < 1 {
        anyhow::bail!("retrieval.default_top_k must be >= 1");
    }
    if config.retrieval.default_top_k > config.retrieval.max_top_k {
        anyhow::bail!("retrieval.default_top_k must be <= retrieval.max_top_k");
    }

    // Validate eval
    if config.eval.top_ks.is_empty() || config.eval.top_ks.contains(&0) {
        anyhow::bail!("eval.top_ks must be a non-empty list of values >= 1");
    }

    Ok(())
}
