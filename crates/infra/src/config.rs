//! Settings loaded from the environment.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Runtime settings for the worker and CLI.
///
/// | Env Var                      | Default                        |
/// |------------------------------|--------------------------------|
/// | `TASKFORGE_DATABASE_URL`     | `sqlite://taskforge.db?mode=rwc` |
/// | `TASKFORGE_POLL_INTERVAL_MS` | `500`                          |
/// | `TASKFORGE_MAX_CONCURRENT`   | `10`                           |
/// | `TASKFORGE_JOB_PROGRAM`      | `taskforge-job` next to the current executable |
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub database_url: String,
    pub poll_interval: Duration,
    pub max_concurrent: usize,
    pub job_program: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: Self::DEFAULT_DATABASE_URL.to_string(),
            poll_interval: Duration::from_millis(500),
            max_concurrent: 10,
            job_program: None,
        }
    }
}

impl Settings {
    pub const DEFAULT_DATABASE_URL: &'static str = "sqlite://taskforge.db?mode=rwc";

    /// Read `.env` (if present) and then the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(val) = lookup("TASKFORGE_DATABASE_URL") {
            settings.database_url = val;
        }

        if let Some(val) = lookup("TASKFORGE_POLL_INTERVAL_MS") {
            let ms: u64 = parse_env_value(&val, "TASKFORGE_POLL_INTERVAL_MS")?;
            settings.poll_interval = Duration::from_millis(ms);
        }

        if let Some(val) = lookup("TASKFORGE_MAX_CONCURRENT") {
            let max: usize = parse_env_value(&val, "TASKFORGE_MAX_CONCURRENT")?;
            if max == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "TASKFORGE_MAX_CONCURRENT".to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
            settings.max_concurrent = max;
        }

        if let Some(val) = lookup("TASKFORGE_JOB_PROGRAM").filter(|v| !v.trim().is_empty()) {
            settings.job_program = Some(PathBuf::from(val));
        }

        Ok(settings)
    }
}

fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{value}'"),
    })
}
