//! # Structured Logging
//!
//! Installs the global `tracing` subscriber: an `EnvFilter` seeded from
//! `RUST_LOG` with the configured level as the default directive, and a
//! `fmt` layer writing either JSON or human-readable text.

use crate::core::config::LoggingConfig;
use crate::core::error::{TrackingError, TrackingResult};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Output format of the log layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    pub fn parse(raw: &str) -> TrackingResult<Self> {
        match raw.trim().to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" => Ok(Self::Text),
            other => Err(TrackingError::config(format!("unknown log format '{}'", other))),
        }
    }
}

pub fn parse_level(raw: &str) -> TrackingResult<Level> {
    match raw.trim().to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(TrackingError::config(format!("unknown log level '{}'", other))),
    }
}

/// Install the global subscriber. A second call keeps the first subscriber.
pub fn init_logging(config: &LoggingConfig) -> TrackingResult<()> {
    let level = parse_level(&config.level)?;
    let format = LogFormat::parse(&config.format)?;

    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let installed = match format {
        LogFormat::Json => Registry::default()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init(),
        LogFormat::Text => Registry::default()
            .with(env_filter)
            .with(fmt::layer().with_target(true))
            .try_init(),
    };

    if installed.is_err() {
        warn!("Tracing subscriber already initialized, skipping initialization");
        return Ok(());
    }

    info!(
        service = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        "Structured logging initialized"
    );
    Ok(())
}
