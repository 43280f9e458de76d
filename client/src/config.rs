//! Configuration management for the client.

use std::env;
use std::time::Duration;
use tasksync_engine::RetryPolicy;

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the remote task API (e.g. `https://host/api`)
    pub api_url: String,
    /// Bearer token sent with every request
    pub api_token: Option<String>,
    /// SQLite URL of the durable local store
    pub database_url: String,
    /// Period of the background sync while online
    pub sync_interval: Duration,
    /// Timeout of a single remote request
    pub request_timeout: Duration,
    /// Retry budget for rejected operations
    pub retry: RetryPolicy,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = lookup("TASKSYNC_API_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .ok_or(ConfigError::MissingApiUrl)?;

        let api_token = lookup("TASKSYNC_API_TOKEN").filter(|t| !t.is_empty());

        let database_url =
            lookup("TASKSYNC_DATABASE_URL").unwrap_or_else(|| "sqlite://tasksync.db".to_string());

        let sync_interval = Duration::from_secs(number(&lookup, "TASKSYNC_SYNC_INTERVAL_SECS", 30)?);
        let request_timeout =
            Duration::from_secs(number(&lookup, "TASKSYNC_REQUEST_TIMEOUT_SECS", 10)?);

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: number(
                &lookup,
                "TASKSYNC_MAX_ATTEMPTS",
                u64::from(defaults.max_attempts),
            )? as u32,
            base_delay_ms: number(&lookup, "TASKSYNC_BACKOFF_BASE_MS", defaults.base_delay_ms)?,
            max_delay_ms: number(&lookup, "TASKSYNC_BACKOFF_MAX_MS", defaults.max_delay_ms)?,
        };

        Ok(Self {
            api_url,
            api_token,
            database_url,
            sync_interval,
            request_timeout,
            retry,
        })
    }
}

fn number<F>(lookup: &F, key: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber(key)),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("TASKSYNC_API_URL environment variable is required")]
    MissingApiUrl,

    #[error("Invalid numeric value for {0}")]
    InvalidNumber(&'static str),
}
