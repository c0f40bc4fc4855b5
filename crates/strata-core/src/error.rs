//! Error types for settings loading and logging setup

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {details}")]
    Invalid { details: String },
}

/// Result type alias for settings operations
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid RUST_LOG: {0}")]
    Filter(#[from] tracing_subscriber::filter::FromEnvError),

    #[error("Unknown log format {0:?}, expected compact or full")]
    UnknownFormat(String),

    #[error("Failed to install tracing subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}
