// Tracing subscriber setup for the binary. Logs go to stderr so that stdout
// carries only the children's output.

use tracing::Subscriber;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use thiserror::Error;

pub const DEFAULT_LEVEL: &str = "warn";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter `{0}`")]
    InvalidFilter(String),
    #[error("logger already initialized")]
    AlreadyInitialized,
}

/// Install the global subscriber. `level` takes precedence over `RUST_LOG`;
/// with neither set only warnings and errors are shown.
pub fn init(format: LogFormat, level: Option<&str>) -> Result<(), LoggingError> {
    let filter = filter(level)?;
    match format {
        LogFormat::Text => {
            let layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true);
            install(tracing_subscriber::registry().with(filter).with(layer))
        }
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .with_target(true);
            install(tracing_subscriber::registry().with(filter).with(layer))
        }
    }
}

fn filter(level: Option<&str>) -> Result<EnvFilter, LoggingError> {
    match level {
        Some(level) => {
            EnvFilter::try_new(level).map_err(|_| LoggingError::InvalidFilter(level.to_string()))
        }
        None => Ok(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL))),
    }
}

fn install<S>(subscriber: S) -> Result<(), LoggingError>
where
    S: Subscriber + Send + Sync + 'static,
{
    subscriber
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)
}
