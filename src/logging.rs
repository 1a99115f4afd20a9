//! Structured logging setup.
//!
//! Installs a compact, timestamped `tracing` subscriber. The level comes from
//! `[logging] level` in the config; `RUST_LOG` takes precedence when set:
//!
//! ```bash
//! RUST_LOG=debug kbr ingest
//! RUST_LOG=retrieval_harness::embedding=trace kbr serve
//! ```

use std::sync::Once;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

static INIT: Once = Once::new();

/// Compact time format: HH:MM:SS.mmm
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Initialize logging. Only the first call takes effect.
///
/// Logs go to stderr so command summaries on stdout stay parseable.
pub fn init(level: &str) {
    INIT.call_once(|| {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_timer(CompactTime)
            .with_level(true)
            .with_filter(filter);

        // A subscriber may already be installed by an embedding application.
        let _ = tracing_subscriber::registry().with(fmt_layer).try_init();
    });
}
