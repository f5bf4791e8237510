//! File system layout for the queue services.

use crate::{ConfigError, ConfigResult};
use std::path::PathBuf;

/// Directory (under the base dir) holding the durable queue files.
const QUEUE_DIR_NAME: &str = "queue";
/// Central JSONL log file name.
const LOG_FILE_NAME: &str = "queue.jsonl";

/// Resolves every path the queue services read or write.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory (~/.warroom)
    base_dir: PathBuf,
}

impl Paths {
    /// Use `~/.warroom` as the base directory.
    pub fn new() -> ConfigResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| ConfigError::Path("Could not determine home directory".to_string()))?;
        Ok(Self {
            base_dir: home.join(".warroom"),
        })
    }

    /// Use a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory.
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Config file (~/.warroom/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Directory backing the durable queue medium (~/.warroom/queue).
    pub fn queue_dir(&self) -> PathBuf {
        self.base_dir.join(QUEUE_DIR_NAME)
    }

    /// Logs directory (~/.warroom/logs).
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Central JSONL log file (~/.warroom/logs/queue.jsonl).
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join(LOG_FILE_NAME)
    }

    /// Create the base, queue and logs directories.
    pub fn ensure_dirs(&self) -> ConfigResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.queue_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
