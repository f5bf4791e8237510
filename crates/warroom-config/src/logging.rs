//! Logging initialization for the queue services.

use crate::Paths;

/// Initialize logging for a queue service.
///
/// Structured JSONL goes to `~/.warroom/logs/queue.jsonl`; `RUST_LOG`
/// overrides `level`. With `foreground` set the same events are also echoed
/// to stderr.
pub fn init_logging(service_name: &str, level: &str, paths: &Paths, foreground: bool) {
    observability::init_with_config(observability::LogConfig {
        service_name: service_name.into(),
        default_level: level.into(),
        log_path: Some(paths.log_file()),
        also_stderr: foreground,
    });
}
