/// Workflow definition contract
pub mod process_type_executor;

/// Workflow definition registry
pub mod registry;

/// Process execution engine
pub mod process_executor;
