//! In-memory state store for the onboarding process engine
//!
//! This crate provides in-memory implementations of the process and step
//! repositories defined in onboard-core. It is useful for development,
//! tests and single-node deployments where persistence is not required.

use std::sync::Arc;
use tokio::sync::RwLock;

use onboard_core::{ProcessRepository, ProcessStepRepository};

pub mod repositories;
pub use repositories::{InMemoryProcessRepository, InMemoryProcessStepRepository, InMemoryState};

/// Provider for in-memory repositories sharing one state
#[derive(Debug, Clone, Default)]
pub struct InMemoryStateStoreProvider {
    state: Arc<RwLock<InMemoryState>>,
}

impl InMemoryStateStoreProvider {
    /// Create a new, empty provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the process and step repositories over the shared state
    pub fn create_repositories(
        &self,
    ) -> (Arc<dyn ProcessRepository>, Arc<dyn ProcessStepRepository>) {
        let process_repo = Arc::new(InMemoryProcessRepository::new(self.state.clone()));
        let step_repo = Arc::new(InMemoryProcessStepRepository::new(self.state.clone()));
        (process_repo, step_repo)
    }
}
