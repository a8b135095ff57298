//! Observability: structured logging initialization.
//!
//! Metrics are emitted through the `metrics` macro facade throughout the
//! crate; installing a recorder is the embedding application's choice. This
//! module only owns the tracing subscriber.

use crate::{Error, Result};
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable output for terminals.
    #[default]
    Pretty,
    /// Newline-delimited JSON for log shippers.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Directive string for the env filter, `RUST_LOG` wins over it.
    pub default_directive: String,
}

impl LoggingConfig {
    /// Builds a configuration from the verbose flag and environment.
    ///
    /// `AXON_LOG_FORMAT=json` selects JSON output; verbose raises the
    /// default level from `warn` to `debug` for this crate.
    #[must_use]
    pub fn from_env(verbose: bool) -> Self {
        let format = match std::env::var("AXON_LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };
        let default_directive = if verbose {
            "warn,axon=debug".to_string()
        } else {
            "warn,axon=info".to_string()
        };
        Self {
            format,
            default_directive,
        }
    }
}

static LOGGING_INIT: OnceLock<()> = OnceLock::new();

/// Initializes the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if logging has already been initialized in this process.
pub fn init(config: &LoggingConfig) -> Result<()> {
    if LOGGING_INIT.get().is_some() {
        return Err(Error::OperationFailed {
            operation: "logging_init".to_string(),
            cause: "logging already initialized".to_string(),
        });
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_directive));

    let result = match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true),
            )
            .with(filter)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .with(filter)
            .try_init(),
    };
    result.map_err(|e| Error::OperationFailed {
        operation: "logging_init".to_string(),
        cause: e.to_string(),
    })?;

    LOGGING_INIT.set(()).map_err(|()| Error::OperationFailed {
        operation: "logging_init".to_string(),
        cause: "failed to mark logging initialized".to_string(),
    })?;
    Ok(())
}
