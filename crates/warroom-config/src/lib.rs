//! Configuration, file-system layout and logging setup for the War Room queue services.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{Config, QueueSettings, DEFAULT_LOG_LEVEL};
pub use error::{ConfigError, ConfigResult};
pub use logging::init_logging;
pub use paths::Paths;
