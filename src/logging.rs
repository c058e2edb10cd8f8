//! Tracing subscriber setup.
//!
//! [`init`] picks the output from `[logging].log_dir`: a daily-rotated JSON
//! file plus stderr when a directory is configured, stderr only otherwise.
//! `RUST_LOG` always wins over the built-in default level.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// File name prefix of the rotated trace files.
pub const LOG_FILE_PREFIX: &str = "unsend-mailer.log";

/// Keeps the non-blocking file writer alive; dropping it flushes pending
/// entries.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

/// Install the subscriber described by `config`.
///
/// Returns a guard only in file mode.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created or a global
/// subscriber is already installed (file mode only).
pub fn init(config: &LoggingConfig) -> anyhow::Result<Option<LoggingGuard>> {
    match &config.log_dir {
        Some(dir) => init_file(dir).map(Some),
        None => {
            init_console();
            Ok(None)
        }
    }
}

/// JSON traces to `{logs_dir}/unsend-mailer.log.YYYY-MM-DD` plus
/// human-readable stderr output. Default level `info`.
///
/// # Errors
///
/// Returns an error if `logs_dir` cannot be created or a global subscriber
/// is already installed.
pub fn init_file(logs_dir: &Path) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir).map_err(|e| {
        anyhow::anyhow!(
            "failed to create logs directory {}: {e}",
            logs_dir.display()
        )
    })?;

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX));

    tracing_subscriber::registry()
        .with(filter("info"))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_writer(writer),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    Ok(LoggingGuard { _guard: guard })
}

/// Stderr only, default level `warn` so command output stays readable.
/// A second call is a no-op.
pub fn init_console() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter("warn"))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}
