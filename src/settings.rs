use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::{MatchError, Result};

const DEFAULT_FILE: &str = "matchstore";
const ENV_PREFIX: &str = "MATCHSTORE";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    /// SQLite database file, or `:memory:`.
    pub database_path: String,
    /// Records fetched per cursor page.
    pub cursor_batch_size: usize,
    pub progress_interval_secs: u64,
    pub busy_timeout_ms: u64,
    /// Default tracing filter when `RUST_LOG` is not set.
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: ":memory:".to_string(),
            cursor_batch_size: 1000,
            progress_interval_secs: 15,
            busy_timeout_ms: 5000,
            log_filter: "info".to_string(),
        }
    }
}

impl Settings {
    /// Defaults, then `matchstore.{toml,json,yaml}` (or `path`) if present,
    /// then `MATCHSTORE_*` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let defaults = Self::default();
        let file = match path {
            Some(path) => File::with_name(path).required(true),
            None => File::with_name(DEFAULT_FILE).required(false),
        };
        let settings: Self = Config::builder()
            .set_default("database_path", defaults.database_path)?
            .set_default("cursor_batch_size", defaults.cursor_batch_size as i64)?
            .set_default("progress_interval_secs", defaults.progress_interval_secs as i64)?
            .set_default("busy_timeout_ms", defaults.busy_timeout_ms as i64)?
            .set_default("log_filter", defaults.log_filter)?
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }
    pub fn validate(&self) -> Result<()> {
        if self.database_path.trim().is_empty() {
            return Err(MatchError::Config("database_path must be specified".into()));
        }
        if self.cursor_batch_size == 0 {
            return Err(MatchError::Config("cursor_batch_size must be > 0".into()));
        }
        Ok(())
    }
    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }
}
