//! Tracing subscriber setup.
//!
//! Console output always goes to stderr so command output on stdout stays
//! machine readable. When a log directory is configured, a second layer
//! writes to a daily rolling file.

use chrono::Local;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "queuectl=info,sqlx=warn";

/// File name prefix for rolling log files.
const LOG_FILE_PREFIX: &str = "queuectl.log";

/// Formats timestamps in the local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Build the filter directive for a plain level such as `debug`.
///
/// Anything that already looks like a directive list is used as-is.
pub fn filter_directive(level: &str) -> String {
    let level = level.trim();
    if level.is_empty() {
        DEFAULT_LOG_FILTER.to_string()
    } else if level.contains('=') || level.contains(',') {
        level.to_string()
    } else {
        format!("queuectl={level},sqlx=warn")
    }
}

fn build_filter(level: &str) -> crate::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(filter_directive(level))
        .map_err(|e| crate::Error::config(format!("Invalid log level {level:?}: {e}")))
}

/// Initialize the global subscriber.
///
/// `RUST_LOG` takes precedence over `level`. Returns the file writer guard
/// when `log_dir` is set; keep it alive for the lifetime of the process.
pub fn init_logging(level: &str, log_dir: Option<&Path>) -> crate::Result<Option<WorkerGuard>> {
    let filter = build_filter(level)?;

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true)
                .with_timer(LocalTimer),
        )
        .with(file_layer)
        .try_init()
        .map_err(|e| {
            crate::Error::Other(format!("Failed to set global default subscriber: {}", e))
        })?;

    Ok(guard)
}
