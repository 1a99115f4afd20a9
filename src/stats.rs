//! Index statistics.
//!
//! Summarises what's indexed: entry count, vector dimension, and a per-source
//! breakdown. Used by `kbr stats` to confirm an ingestion run landed.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::store::{SqliteIndex, VectorIndex};

struct SourceStats {
    source: String,
    entries: i64,
    last_ingest_ts: i64,
}

/// Run the stats command: query the index database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let index = SqliteIndex::open(&config.db.path).await?;
    let total = index.count().await?;
    let dims = index.dims().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Retrieval Harness — Index Stats");
    println!("===============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Entries:     {}", total);
    match dims {
        Some(d) => println!("  Dimensions:  {}", d),
        None => println!("  Dimensions:  -"),
    }
    println!("  Metric:      {:?}", config.retrieval.metric);

    let rows = sqlx::query(
        r#"
        SELECT
            COALESCE(json_extract(metadata_json, '$.source'), '(none)') AS source,
            COUNT(*) AS entries,
            MAX(created_at) AS last_ingest
        FROM index_entries
        GROUP BY source
        ORDER BY entries DESC
        "#,
    )
    .fetch_all(index.pool())
    .await?;

    let sources: Vec<SourceStats> = rows
        .iter()
        .map(|row| SourceStats {
            source: row.get("source"),
            entries: row.get("entries"),
            last_ingest_ts: row.get("last_ingest"),
        })
        .collect();

    if !sources.is_empty() {
        println!();
        println!("  By source:");
        println!("  {:<48} {:>8}   {}", "SOURCE", "ENTRIES", "INGESTED");
        println!("  {}", "-".repeat(76));
        for s in &sources {
            println!(
                "  {:<48} {:>8}   {}",
                s.source,
                s.entries,
                format_ts_iso(s.last_ingest_ts)
            );
        }
    }

    println!();
    index.close().await;
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_format_ts_iso() {
        assert_eq!(format_ts_iso(0), "1970-01-01 00:00");
    }
}
