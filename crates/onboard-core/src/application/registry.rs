use std::collections::HashMap;
use std::sync::Arc;

use super::process_type_executor::ProcessTypeExecutor;
use crate::domain::process::ProcessTypeId;
use crate::CoreError;

/// Maps each workflow kind to its single workflow definition
///
/// Built once at composition time and shared immutably afterwards.
#[derive(Clone, Default)]
pub struct ProcessTypeRegistry {
    executors: HashMap<ProcessTypeId, Arc<dyn ProcessTypeExecutor>>,
    registration_order: Vec<ProcessTypeId>,
}

impl ProcessTypeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workflow definition under its own kind
    pub fn register(&mut self, executor: Arc<dyn ProcessTypeExecutor>) -> Result<(), CoreError> {
        let process_type_id = executor.process_type_id();
        if self.executors.contains_key(&process_type_id) {
            return Err(CoreError::DuplicateProcessType(process_type_id.0));
        }

        tracing::debug!(process_type = %process_type_id, "Registered workflow definition");
        self.registration_order.push(process_type_id.clone());
        self.executors.insert(process_type_id, executor);
        Ok(())
    }

    /// Builder form of [`register`](Self::register)
    pub fn with_executor(mut self, executor: Arc<dyn ProcessTypeExecutor>) -> Result<Self, CoreError> {
        self.register(executor)?;
        Ok(self)
    }

    /// Look up the definition for a workflow kind
    pub fn get(&self, process_type_id: &ProcessTypeId) -> Option<Arc<dyn ProcessTypeExecutor>> {
        self.executors.get(process_type_id).cloned()
    }

    /// Registered workflow kinds in registration order
    pub fn registered_process_types(&self) -> Vec<ProcessTypeId> {
        self.registration_order.clone()
    }

    /// Number of registered definitions
    pub fn len(&self) -> usize {
        self.executors.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl std::fmt::Debug for ProcessTypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessTypeRegistry")
            .field("process_types", &self.registration_order)
            .finish()
    }
}
