//! # Observability
//!
//! Logging setup shared by the War Room queue services.
//!
//! Services call [`init_with_config`] once at startup and then use the plain
//! `tracing` macros. Where the lines end up is decided here:
//!
//! - With a `log_path`, every event is appended as one JSON object per line
//!   (`tail -f ~/.warroom/logs/queue.jsonl | jq`).
//! - With `also_stderr` (or without a `log_path`), a compact human-readable
//!   stream goes to stderr.
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "warroom-queue".into(),
//!     default_level: "debug".into(),
//!     log_path: Some(paths.log_file()),
//!     also_stderr: true,
//! });
//! tracing::info!("queue worker started");
//! ```

mod file_writer;
mod json_layer;

use std::path::PathBuf;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub use file_writer::{AppendWriter, AppendWriterFactory};
pub use json_layer::{JsonLayer, LogEntry};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, written into every JSONL line.
    pub service_name: String,

    /// Default filter directive (e.g. "info", "pending_message_queue=debug").
    /// `RUST_LOG` takes precedence when set.
    pub default_level: String,

    /// JSONL output file. `None` disables the file layer.
    pub log_path: Option<PathBuf>,

    /// Also emit compact logs to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Initialize logging with defaults (stderr only).
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        also_stderr: true,
        ..Default::default()
    });
}

/// Initialize logging with custom configuration.
///
/// Calling this more than once is harmless: later calls leave the first
/// subscriber in place. If the log file cannot be opened the file layer is
/// skipped and logging continues on stderr.
pub fn init_with_config(config: LogConfig) {
    let filter = || {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.default_level))
    };

    let (json_layer, open_error) = match &config.log_path {
        Some(path) => match AppendWriter::open(path) {
            Ok(writer) => (
                Some(
                    JsonLayer::new(
                        config.service_name.clone(),
                        AppendWriterFactory::new(writer),
                    )
                    .with_filter(filter()),
                ),
                None,
            ),
            Err(err) => (None, Some(format!("{}: {}", path.display(), err))),
        },
        None => (None, None),
    };

    let want_stderr = config.also_stderr || json_layer.is_none();
    let stderr_layer = want_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(std::io::stderr)
            .with_filter(filter())
    });

    let installed = tracing_subscriber::registry()
        .with(json_layer)
        .with(stderr_layer)
        .try_init()
        .is_ok();

    if !installed {
        return;
    }

    if let Some(err) = open_error {
        tracing::warn!(error = %err, "log file unavailable, logging to stderr only");
    } else if let Some(path) = &config.log_path {
        tracing::debug!(log_path = %path.display(), service = %config.service_name, "observability initialized");
    }
}

pub use tracing::{debug, error, info, trace, warn, Level};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.service_name, "unknown");
        assert_eq!(config.default_level, "info");
        assert!(config.log_path.is_none());
        assert!(!config.also_stderr);
    }

    #[test]
    fn init_twice_does_not_panic() {
        init("first");
        init("second");
    }
}
