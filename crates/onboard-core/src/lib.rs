//!
//! Onboard Core - Process step execution engine
//!
//! This crate defines the process and step model, the store interfaces,
//! the workflow definition contract and the engine that drives every
//! long-running onboarding workflow (registration checklists, invitations,
//! identity provider synchronisation) one process at a time.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - processes, steps and store interfaces
pub mod domain;

/// Application services - workflow definitions, registry and engine
pub mod application;

/// Cooperative cancellation
pub mod cancellation;

/// Error types
pub mod error;

/// Scripted workflow definitions for tests
#[cfg(feature = "testing")]
pub mod testing;

// Re-export main API types for easy use
pub use application::process_executor::{ProcessExecutionStream, ProcessExecutor};
pub use application::process_type_executor::{
    InitializationResult, ProcessTypeExecutor, StepExecutionResult, StepResultStatus,
};
pub use application::registry::ProcessTypeRegistry;
pub use cancellation::CancellationToken;
pub use domain::process::{
    Process, ProcessId, ProcessStep, ProcessStepId, ProcessStepStatus, ProcessStepTypeId,
    ProcessTypeId,
};
pub use domain::repository::{ProcessRepository, ProcessStepRepository, StepModifier};
pub use error::{CoreError, StepError};
