//! Configuration module - environment variables and command line flags

pub mod cli;

use std::env;
use std::str::FromStr;
use std::time::Duration;

pub use cli::{Cli, LogFormat, Scenario};

/// Runtime settings loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Host the engine listens on
    pub engine_host: String,
    /// How long to keep retrying the first connection while the engine boots
    pub connect_timeout: Duration,
    /// Pause between connection attempts
    pub connect_retry: Duration,
    /// Upper bound for a single request/reply round trip
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            engine_host: "127.0.0.1".to_string(),
            connect_timeout: Duration::from_secs(60),
            connect_retry: Duration::from_millis(500),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            engine_host: env::var("ENGINE_HOST").unwrap_or(defaults.engine_host),
            connect_timeout: parse_var("CONNECT_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            connect_retry: parse_var("CONNECT_RETRY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_retry),
            request_timeout: parse_var("REQUEST_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
        })
    }
}

/// Parse an optional numeric environment variable
fn parse_var<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidVar { name, value: raw }),
        Err(_) => Ok(None),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {name}: {value:?}")]
    InvalidVar { name: &'static str, value: String },

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
