use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

/// Default mirror set used when `MIRROR_URLS` is not configured.
const DEFAULT_MIRRORS: &[&str] = &[
    "https://nitter.net",
    "https://nitter.poast.org",
    "https://nitter.privacydev.net",
    "https://nitter.unixfox.eu",
    "https://nitter.privacytools.io",
];

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Feed fetching
    pub mirror_urls: Vec<String>,
    pub fetch_timeout: Duration,
    pub failover_backoff: Duration,

    // Batch polling
    pub poll_interval: Duration,
    pub batch_deadline: Duration,

    // Database
    pub database_path: PathBuf,

    // Web server
    pub web_host: String,
    pub web_port: u16,

    // Trigger auth
    pub cron_secret: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            mirror_urls: parse_mirror_urls(&env_or_default(
                "MIRROR_URLS",
                &DEFAULT_MIRRORS.join(","),
            )),
            fetch_timeout: Duration::from_secs(parse_env_u64("FETCH_TIMEOUT_SECS", 15)?),
            failover_backoff: Duration::from_millis(parse_env_u64("FAILOVER_BACKOFF_MS", 1000)?),

            poll_interval: Duration::from_secs(parse_env_u64("POLL_INTERVAL_SECS", 300)?),
            batch_deadline: Duration::from_secs(parse_env_u64("BATCH_DEADLINE_SECS", 55)?),

            database_path: PathBuf::from(env_or_default("DATABASE_PATH", "./data/monitor.sqlite")),

            web_host: env_or_default("WEB_HOST", "0.0.0.0"),
            web_port: parse_env_u16("WEB_PORT", 8080)?,

            cron_secret: required_env("CRON_SECRET")?,
        })
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mirror_urls.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "MIRROR_URLS".to_string(),
                message: "at least one mirror URL is required".to_string(),
            });
        }
        if self.cron_secret.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "CRON_SECRET".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if self.batch_deadline.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "BATCH_DEADLINE_SECS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Configuration with test-friendly defaults for integration tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            mirror_urls: vec!["http://127.0.0.1:0".to_string()],
            fetch_timeout: Duration::from_secs(5),
            failover_backoff: Duration::from_millis(10),
            poll_interval: Duration::from_secs(60),
            batch_deadline: Duration::from_secs(30),
            database_path: PathBuf::from(":memory:"),
            web_host: "127.0.0.1".to_string(),
            web_port: 0,
            cron_secret: "test-secret".to_string(),
        }
    }
}

/// Split a comma-separated mirror list, trimming entries and trailing slashes.
fn parse_mirror_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u16(name: &str, default: u16) -> Result<u16, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}
