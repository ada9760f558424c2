//! Tracing subscriber setup.

use std::error::Error as StdError;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::ParseError;

#[derive(thiserror::Error, Debug)]
/// The subscriber could not be installed.
pub(crate) enum TelemetryError {
    /// The configured level is not a valid filter directive.
    #[error("invalid log level/filter '{value}'")]
    EnvFilter {
        /// Rejected directive.
        value: String,
        /// Parser failure.
        #[source]
        source: ParseError,
    },
    /// A global subscriber is already set.
    #[error("telemetry error: {0}")]
    Subscriber(Box<dyn StdError + Send + Sync>),
}

/// Install the global subscriber. `RUST_LOG` wins over `log_level`.
pub(crate) fn init(log_level: &str) -> Result<(), TelemetryError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_unset) => EnvFilter::try_new(log_level).map_err(|source| TelemetryError::EnvFilter {
            value: log_level.to_owned(),
            source,
        })?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(TelemetryError::Subscriber)
}
