//! Error types for clusterlimit.

use thiserror::Error;

/// Main error type for clusterlimit operations.
#[derive(Error, Debug)]
pub enum LimiterError {
    /// The local limiter's backing resource could not be initialized
    #[error("Setup error: {0}")]
    Setup(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Send or receive failure between a worker and the coordinator
    #[error("Channel error: {0}")]
    Channel(String),

    /// Local limiter backing store errors during normal operation
    #[error("Backend error: {0}")]
    Backend(String),

    /// Malformed or unexpected wire traffic
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Message encoding errors
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::config::ConfigError> for LimiterError {
    fn from(err: ::config::ConfigError) -> Self {
        LimiterError::Config(err.to_string())
    }
}

/// Result type alias for clusterlimit operations.
pub type Result<T> = std::result::Result<T, LimiterError>;
