//! Process-wide tracing setup.

use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;
use crate::error::ConfigError;

/// `RUST_LOG` wins over the configured level when set and valid.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, ConfigError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level)
        .map_err(|e| ConfigError::Logging(format!("invalid level '{}': {}", config.level, e)))
}

/// Installs the global subscriber and routes `log` records (emitted by the
/// database layer) into it. Call once, early in `main`.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), ConfigError> {
    LogTracer::init().map_err(|e| ConfigError::Logging(e.to_string()))?;

    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = if config.json {
        fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .boxed()
    } else {
        fmt::layer().compact().with_target(true).boxed()
    };

    let subscriber = tracing_subscriber::registry()
        .with(fmt_layer)
        .with(build_filter(config)?);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| ConfigError::Logging(e.to_string()))
}
