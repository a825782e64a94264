//! Error types for the process worker

use onboard_core::CoreError;
use thiserror::Error;

/// Worker error types
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Engine or store error
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Logging could not be initialised
    #[error("Logging error: {0}")]
    LoggingError(String),
}

/// Result type for worker operations
pub type WorkerResult<T> = Result<T, WorkerError>;
