//! Tracing subscriber setup.

use chrono::Local;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::error::{Error, Result};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "danmu_hub=info,danmu_platforms=info,tower_http=info";

/// Prefix of the daily rolling log files (`danmu-hub.log.YYYY-MM-DD`).
const LOG_FILE_PREFIX: &str = "danmu-hub.log";

/// Console output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Timestamps in the server's local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Build the filter: `RUST_LOG` wins, then `directive`.
fn build_filter(directive: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(directive)
        .map_err(|e| Error::config(format!("Invalid log filter {directive:?}: {e}")))
}

/// Initialize the global subscriber.
///
/// When `log_dir` is set a daily rolling file is written as well; keep the
/// returned guard alive for the lifetime of the process so it gets flushed.
pub fn init_logging(
    directive: &str,
    format: LogFormat,
    log_dir: Option<&Path>,
) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(directive)?;

    let console = match format {
        LogFormat::Pretty => fmt::layer().with_timer(LocalTimer).boxed(),
        LogFormat::Json => fmt::layer().json().with_timer(LocalTimer).boxed(),
    };

    let (file, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_timer(LocalTimer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| Error::Other(format!("Failed to set global default subscriber: {e}")))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }

    #[test]
    fn test_local_timer_format() {
        let mut out = String::new();
        LocalTimer.format_time(&mut Writer::new(&mut out)).unwrap();
        // 2024-01-01T00:00:00.000+08:00
        assert_eq!(out.len(), 29, "{out}");
        assert_eq!(&out[10..11], "T");
    }
}
