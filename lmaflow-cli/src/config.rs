//! Runtime configuration read from the environment.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DATABASE: &str = "lmaflow.db";
const DEFAULT_AMICE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Settings of one `lmaflow` invocation.
pub(crate) struct AppConfig {
    /// SQLite database holding weight tickets and pipeline state.
    pub(crate) database: PathBuf,
    /// Base URL of the AMICE gateway.
    pub(crate) amice_url: String,
    /// Upper bound for a single registry request.
    pub(crate) amice_timeout: Duration,
    /// Pause between two ticks of `lmaflow run`.
    pub(crate) poll_interval: Duration,
    /// Default tracing filter, overridden by `RUST_LOG`.
    pub(crate) log_level: String,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// A configuration value is missing or malformed.
pub(crate) enum ConfigError {
    /// A required variable is not set.
    #[error("{0} must be set")]
    Missing(&'static str),
    /// A duration variable is not a positive whole number of seconds.
    #[error("{name} must be a positive number of seconds, got {value:?}")]
    InvalidSeconds {
        /// Variable name.
        name: &'static str,
        /// Rejected value.
        value: String,
    },
}

impl AppConfig {
    /// Read the configuration from the process environment, after loading `.env`.
    pub(crate) fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the configuration from a variable lookup.
    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |name: &str| {
            lookup(name)
                .map(|raw| raw.trim().to_owned())
                .filter(|raw| !raw.is_empty())
        };

        let amice_url =
            value("LMAFLOW_AMICE_URL").ok_or(ConfigError::Missing("LMAFLOW_AMICE_URL"))?;
        let database = value("LMAFLOW_DATABASE").unwrap_or_else(|| DEFAULT_DATABASE.to_owned());
        let log_level = value("LMAFLOW_LOG_LEVEL").unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_owned());

        Ok(Self {
            database: PathBuf::from(database),
            amice_url,
            amice_timeout: seconds(
                "LMAFLOW_AMICE_TIMEOUT_SECS",
                value("LMAFLOW_AMICE_TIMEOUT_SECS"),
                DEFAULT_AMICE_TIMEOUT_SECS,
            )?,
            poll_interval: seconds(
                "LMAFLOW_POLL_INTERVAL_SECS",
                value("LMAFLOW_POLL_INTERVAL_SECS"),
                DEFAULT_POLL_INTERVAL_SECS,
            )?,
            log_level,
        })
    }
}

fn seconds(name: &'static str, raw: Option<String>, default: u64) -> Result<Duration, ConfigError> {
    let Some(raw) = raw else {
        return Ok(Duration::from_secs(default));
    };
    match raw.parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::InvalidSeconds { name, value: raw }),
    }
}
