//! Configuration management for the queue services.

use crate::{ConfigError, ConfigResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Environment variable overriding the log level.
const ENV_LOG_LEVEL: &str = "WARROOM_LOG_LEVEL";
/// Environment variable holding the Supabase project URL.
const ENV_SUPABASE_URL: &str = "SUPABASE_URL";
/// Environment variable holding the Supabase anon key.
const ENV_SUPABASE_ANON_KEY: &str = "SUPABASE_ANON_KEY";

/// Tunables for the pending-message queue, all durations in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Failed attempts after which an entry is marked failed.
    pub max_retries: u32,
    /// Backoff base delay.
    pub base_delay_ms: u64,
    /// Backoff cap (before jitter).
    pub max_delay_ms: u64,
    /// Upper bound (exclusive) of the random jitter added to each backoff.
    pub jitter_ms: u64,
    /// Debounce between an enqueue and the flush it schedules.
    pub flush_debounce_ms: u64,
    /// Delay before the next pass when a pass leaves entries pending.
    pub retry_window_ms: u64,
    /// Per-attempt delivery timeout.
    pub attempt_timeout_ms: u64,
    /// Default lifetime of a save-callback registration.
    pub callback_timeout_ms: u64,
    /// Delay of the first flush after startup.
    pub initial_flush_delay_ms: u64,
    /// Evict failed entries older than this many seconds. `None` keeps them.
    pub failed_ttl_secs: Option<u64>,
    /// Try a one-shot direct delivery when the durable store is unavailable.
    pub direct_delivery_fallback: bool,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter_ms: 500,
            flush_debounce_ms: 100,
            retry_window_ms: 5_000,
            attempt_timeout_ms: 15_000,
            callback_timeout_ms: 60_000,
            initial_flush_delay_ms: 1_000,
            failed_ttl_secs: None,
            direct_delivery_fallback: true,
        }
    }
}

/// Main service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Supabase project URL.
    #[serde(default)]
    pub supabase_url: String,
    /// Supabase anon (publishable) key.
    #[serde(default)]
    pub supabase_anon_key: String,
    /// Queue tunables.
    #[serde(default)]
    pub queue: QueueSettings,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            queue: QueueSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from the config file (defaults when absent),
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> ConfigResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the config file.
    pub fn save(&self, paths: &Paths) -> ConfigResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Override settings from environment-style lookups. Empty values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(level) = non_empty(ENV_LOG_LEVEL) {
            self.log_level = level;
        }
        if let Some(url) = non_empty(ENV_SUPABASE_URL) {
            self.supabase_url = url;
        }
        if let Some(key) = non_empty(ENV_SUPABASE_ANON_KEY) {
            self.supabase_anon_key = key;
        }
    }

    /// Fail unless both Supabase settings are present and the URL parses.
    pub fn require_supabase(&self) -> ConfigResult<Url> {
        if self.supabase_url.trim().is_empty() {
            return Err(ConfigError::Config(format!(
                "missing Supabase URL (set {} or supabase_url)",
                ENV_SUPABASE_URL
            )));
        }
        if self.supabase_anon_key.trim().is_empty() {
            return Err(ConfigError::Config(format!(
                "missing Supabase anon key (set {} or supabase_anon_key)",
                ENV_SUPABASE_ANON_KEY
            )));
        }
        self.supabase_url()
    }

    /// Get the Supabase URL as a parsed URL.
    pub fn supabase_url(&self) -> ConfigResult<Url> {
        Url::parse(&self.supabase_url).map_err(ConfigError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert!(config.supabase_url.is_empty());
        assert_eq!(config.queue.max_retries, 5);
        assert_eq!(config.queue.base_delay_ms, 1_000);
        assert_eq!(config.queue.max_delay_ms, 30_000);
        assert_eq!(config.queue.jitter_ms, 500);
        assert_eq!(config.queue.flush_debounce_ms, 100);
        assert_eq!(config.queue.retry_window_ms, 5_000);
        assert_eq!(config.queue.attempt_timeout_ms, 15_000);
        assert_eq!(config.queue.callback_timeout_ms, 60_000);
        assert!(config.queue.failed_ttl_secs.is_none());
        assert!(config.queue.direct_delivery_fallback);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "log_level": "debug", "queue": { "max_retries": 3, "failed_ttl_secs": 86400 } }"#,
        )
        .unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.queue.max_retries, 3);
        assert_eq!(config.queue.failed_ttl_secs, Some(86_400));
        assert_eq!(config.queue.base_delay_ms, 1_000);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let mut config = Config::default();
        config.log_level = "trace".to_string();
        config.queue.retry_window_ms = 2_500;
        config.save(&paths).unwrap();

        let loaded = Config::load_from_file(&paths.config_file()).unwrap();
        assert_eq!(loaded.log_level, "trace");
        assert_eq!(loaded.queue.retry_window_ms, 2_500);
    }

    #[test]
    fn test_load_nonexistent_uses_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config::load(&paths).unwrap();
        assert_eq!(config.queue, QueueSettings::default());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env_overrides(env(&[
            ("WARROOM_LOG_LEVEL", "warn"),
            ("SUPABASE_URL", "https://proj.supabase.co"),
            ("SUPABASE_ANON_KEY", "anon-key"),
        ]));

        assert_eq!(config.log_level, "warn");
        assert_eq!(config.supabase_url, "https://proj.supabase.co");
        assert_eq!(config.supabase_anon_key, "anon-key");
    }

    #[test]
    fn test_blank_env_values_are_ignored() {
        let mut config = Config::default();
        config.supabase_url = "https://file.supabase.co".to_string();
        config.apply_env_overrides(env(&[("SUPABASE_URL", "   ")]));
        assert_eq!(config.supabase_url, "https://file.supabase.co");
    }

    #[test]
    fn test_require_supabase() {
        let mut config = Config::default();
        let err = config.require_supabase().unwrap_err();
        assert!(err.to_string().contains("SUPABASE_URL"));

        config.supabase_url = "https://proj.supabase.co".to_string();
        let err = config.require_supabase().unwrap_err();
        assert!(err.to_string().contains("SUPABASE_ANON_KEY"));

        config.supabase_anon_key = "anon".to_string();
        let url = config.require_supabase().unwrap();
        assert_eq!(url.scheme(), "https");
    }

    #[test]
    fn test_invalid_url() {
        let mut config = Config::default();
        config.supabase_url = "not a valid url".to_string();
        config.supabase_anon_key = "anon".to_string();
        assert!(matches!(
            config.require_supabase(),
            Err(ConfigError::InvalidUrl(_))
        ));
    }
}
