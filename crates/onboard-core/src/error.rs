use thiserror::Error;

/// Core error type for the process engine and its stores
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Process not found
    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    /// Process step not found
    #[error("Process step not found: {0}")]
    ProcessStepNotFound(String),

    /// No workflow definition registered for the process type
    #[error("Process type is not registered: {0}")]
    ProcessTypeNotRegistered(String),

    /// A workflow definition for the process type was already registered
    #[error("Process type is already registered: {0}")]
    DuplicateProcessType(String),

    /// Attempt to move a step out of a terminal status
    #[error("Invalid status transition for step {step_id}: {from} -> {to}")]
    InvalidStatusTransition {
        /// Step whose status was to be changed
        step_id: String,
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

    /// Unrecognised failure raised by a workflow definition
    #[error("Step execution error: {0}")]
    StepExecutionError(String),

    /// State store error
    #[error("State store error: {0}")]
    StateStoreError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The run was cancelled between two step types
    #[error("Process execution cancelled")]
    Cancelled,

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

impl From<String> for CoreError {
    fn from(err: String) -> Self {
        CoreError::Other(err)
    }
}

impl From<&str> for CoreError {
    fn from(err: &str) -> Self {
        CoreError::Other(err.to_string())
    }
}

/// Failure reported by a workflow definition while initializing a process
/// or executing one of its steps.
///
/// The engine dispatches on the variant:
/// - `BusinessFailure` ends the step as `FAILED` and the run continues
/// - `Retryable` keeps the step `TODO` with the message recorded
/// - `Fatal` aborts the whole run without persisting anything for the step
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    /// A business rule rejected the step; terminal for the step
    #[error("{message}")]
    BusinessFailure {
        /// Text stored on the failed step
        message: String,
    },

    /// A dependency is temporarily unavailable; the step is retried later
    #[error("{message}")]
    Retryable {
        /// Text stored on the still pending step
        message: String,
    },

    /// Anything the definition cannot classify
    #[error("{0}")]
    Fatal(String),
}

impl StepError {
    /// Business failure with the given message
    pub fn business(message: impl Into<String>) -> Self {
        StepError::BusinessFailure {
            message: message.into(),
        }
    }

    /// Retryable failure with the given message
    pub fn retryable(message: impl Into<String>) -> Self {
        StepError::Retryable {
            message: message.into(),
        }
    }

    /// Fatal failure with the given message
    pub fn fatal(message: impl Into<String>) -> Self {
        StepError::Fatal(message.into())
    }
}

impl From<CoreError> for StepError {
    fn from(err: CoreError) -> Self {
        StepError::Fatal(err.to_string())
    }
}
