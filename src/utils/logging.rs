//! Tracing subscriber setup.

use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::types::{AppError, Result};
use crate::utils::toml_config::{LogFormat, LoggingConfig};

/// Target of the per-query analytics events.
pub const ANALYTICS_TARGET: &str = "docqa::analytics";

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `config.level`. Logs go to stderr so command output
/// on stdout stays clean.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| AppError::Configuration(format!("Invalid log filter '{}': {}", config.level, e)))?;

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(|e| AppError::Internal(format!("Failed to install tracing subscriber: {}", e)))
}
