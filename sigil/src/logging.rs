//! Tracing subscriber setup.
//!
//! Log output goes to stderr, and optionally to a daily-rotated file through a
//! non-blocking writer. The filter defaults to `info` (`debug` when verbose)
//! and can be overridden with `RUST_LOG`.

use std::path::PathBuf;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Default log file name inside the log directory.
pub const DEFAULT_LOG_FILE_NAME: &str = "sigil.log";

/// Errors initialising logging.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Log file path has no file name: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error("Failed to install tracing subscriber: {0}")]
    Init(String),
}

/// Logging options.
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    /// Use `debug` as the default level instead of `info`.
    pub verbose: bool,
    /// Also write logs to this file (rotated daily).
    pub log_file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_directive(&self) -> &'static str {
        if self.verbose {
            "sigil=debug,info"
        } else {
            "info"
        }
    }
}

/// Install the global tracing subscriber.
///
/// Call before starting the Tokio runtime so the local UTC offset can be
/// determined safely. Keep the returned guard alive for the lifetime of the
/// process; dropping it flushes and stops the file writer.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>, LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directive()));

    let offset = time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC);
    let timer = OffsetTime::new(offset, time::format_description::well_known::Rfc3339);

    let stderr_layer = fmt::layer()
        .with_timer(timer.clone())
        .with_writer(std::io::stderr);

    let (file_layer, guard) = match &config.log_file {
        Some(path) => {
            let file_name = path
                .file_name()
                .ok_or_else(|| LoggingError::InvalidPath(path.clone()))?;
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));

            let appender = tracing_appender::rolling::daily(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_timer(timer)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))?;

    Ok(guard)
}

/// Default log file location in the per-user data directory.
pub fn default_log_file() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("sigil").join(DEFAULT_LOG_FILE_NAME))
}
