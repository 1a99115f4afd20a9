//! # Retrieval Harness CLI (`kbr`)
//!
//! ## Usage
//!
//! ```bash
//! kbr --config ./config/kbr.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kbr init` | Create the SQLite index database and schema |
//! | `kbr ingest` | Load, chunk, embed and index the source directory |
//! | `kbr search "<query>"` | Query the local index |
//! | `kbr stats` | Show index entry counts per source |
//! | `kbr serve` | Start the HTTP retrieval server |
//! | `kbr eval <questions.md>` | Measure recall@k against a running server |
//!
//! ## Examples
//!
//! ```bash
//! # Rebuild the index from scratch
//! kbr ingest --purge --config ./config/kbr.toml
//!
//! # Index another directory
//! kbr ingest --source-dir ./standards
//!
//! # Serve with a key taken from the environment
//! KBR_API_KEY=secret kbr serve
//!
//! # Evaluate at k = 1, 5 and 10
//! kbr eval ./data/questions.md --top-k 1 --top-k 5 --top-k 10
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use retrieval_harness::store::SqliteIndex;
use retrieval_harness::{config, eval, ingest, logging, search, server, stats};

/// Retrieval Harness CLI — document ingestion, vector indexing and
/// retrieval for RAG applications.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/kbr.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "kbr",
    about = "Retrieval Harness — document ingestion, vector indexing and retrieval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kbr.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the index database.
    ///
    /// Creates the SQLite file and its schema. Safe to run repeatedly.
    Init,

    /// Ingest every file of the source directory.
    ///
    /// Supported formats: .pdf, .xlsx, .xls, .txt, .md. Any other file aborts
    /// the run before anything is written. Re-ingesting a file adds its chunks
    /// again; pass `--purge` to start from an empty index.
    Ingest {
        /// Directory to ingest (defaults to `[ingest].source_dir`).
        #[arg(long)]
        source_dir: Option<PathBuf>,

        /// Remove all existing index entries once every file's format has
        /// been accepted. A later load or embedding failure still leaves the
        /// index holding only the files processed so far.
        #[arg(long)]
        purge: bool,
    },

    /// Search the index.
    Search {
        /// The search query string.
        query: String,

        /// Number of results (defaults to `[retrieval].default_top_k`).
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Show index statistics.
    Stats,

    /// Start the HTTP retrieval server.
    ///
    /// Serves `/search`, `/retrieval` and `/health` on `[server].bind`.
    Serve,

    /// Evaluate recall@k against a running `/search` endpoint.
    Eval {
        /// Markdown file with a question / gold answer table.
        questions: PathBuf,

        /// Search endpoint URL (defaults to `[eval].endpoint`).
        #[arg(long)]
        endpoint: Option<String>,

        /// k values to report; repeat the flag for several.
        #[arg(long = "top-k")]
        top_k: Vec<usize>,

        /// Report path (defaults to `[eval].output`); a `.csv` path writes
        /// one row per question.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging.level);

    match cli.command {
        Commands::Init => {
            SqliteIndex::open(&cfg.db.path).await?.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { source_dir, purge } => {
            ingest::run_ingest(&cfg, source_dir, purge).await?;
        }
        Commands::Search { query, k } => {
            search::run_search(&cfg, &query, k).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Eval {
            questions,
            endpoint,
            top_k,
            output,
        } => {
            let top_ks = if top_k.is_empty() { None } else { Some(top_k) };
            eval::run_eval(&cfg, &questions, endpoint, top_ks, output).await?;
        }
    }

    Ok(())
}
