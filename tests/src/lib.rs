//! Shared fixtures for the onboarding engine integration tests.
//!
//! Every scenario runs against both store backends; [`Backend::ALL`] lists
//! them and [`open_stores`] hands out a fresh, empty pair of stores.


use std::sync::{Arc, Once};

use futures::StreamExt;
use onboard_core::{
    CancellationToken, CoreError, ProcessExecutor, ProcessId, ProcessStep, ProcessStepStatus,
    ProcessStepTypeId, ProcessTypeExecutor, ProcessTypeId, ProcessTypeRegistry,
};
use onboard_worker::{connect_stores, Stores, WorkerConfig};

/// Store backend a scenario runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// `onboard-state-inmemory`
    InMemory,
    /// `onboard-state-sqlite` on `sqlite::memory:`
    Sqlite,
}

impl Backend {
    /// Every backend
    pub const ALL: [Backend; 2] = [Backend::InMemory, Backend::Sqlite];

    /// Worker configuration selecting this backend
    pub fn worker_config(self) -> WorkerConfig {
        let database_url = match self {
            Backend::InMemory => onboard_worker::config::IN_MEMORY_DATABASE_URL.to_string(),
            Backend::Sqlite => "sqlite::memory:".to_string(),
        };
        WorkerConfig {
            database_url,
            ..Default::default()
        }
    }
}

static TRACING: Once = Once::new();

/// Install a test subscriber once per test binary
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Fresh, empty stores of the given backend
pub async fn open_stores(backend: Backend) -> Stores {
    init_tracing();
    connect_stores(&backend.worker_config())
        .await
        .unwrap_or_else(|e| panic!("failed to open {:?} stores: {}", backend, e))
}

/// Engine over a single workflow definition
pub fn executor_for(definition: Arc<dyn ProcessTypeExecutor>, stores: &Stores) -> ProcessExecutor {
    let registry = ProcessTypeRegistry::new()
        .with_executor(definition)
        .expect("registering a single definition");
    ProcessExecutor::new(Arc::new(registry), stores.steps.clone())
}

/// Create a process of `kind` holding one `TODO` row per entry of `step_types`
pub async fn create_process_with_steps(
    stores: &Stores,
    kind: &str,
    step_types: &[&str],
) -> (ProcessId, Vec<ProcessStep>) {
    let process = stores
        .processes
        .create_process(&ProcessTypeId::new(kind))
        .await
        .expect("creating process");
    let steps = stores
        .steps
        .create_steps(&process.id, &step_types_of(step_types))
        .await
        .expect("creating steps");
    (process.id, steps)
}

/// Run the engine to completion and collect every yielded item
pub async fn run_to_end(
    executor: &ProcessExecutor,
    process_id: &ProcessId,
    kind: &str,
) -> Vec<Result<bool, CoreError>> {
    executor
        .execute_process(process_id, &ProcessTypeId::new(kind), CancellationToken::new())
        .expect("kind is registered")
        .collect()
        .await
}

/// Step type ids from names
pub fn step_types_of(names: &[&str]) -> Vec<ProcessStepTypeId> {
    names.iter().map(|name| ProcessStepTypeId::new(*name)).collect()
}

/// `(step type, status)` of every row, in creation order
pub async fn step_statuses(stores: &Stores, process_id: &ProcessId) -> Vec<(String, ProcessStepStatus)> {
    stores
        .steps
        .load_steps(process_id)
        .await
        .expect("loading steps")
        .into_iter()
        .map(|step| (step.process_step_type_id.0, step.status))
        .collect()
}

/// Complete a manual step the way a portal user would
pub async fn complete_manual_step(stores: &Stores, process_id: &ProcessId, step_type: &str) {
    let steps = stores.steps.load_steps(process_id).await.expect("loading steps");
    let step = steps
        .iter()
        .find(|step| step.is_pending() && step.process_step_type_id.0 == step_type)
        .unwrap_or_else(|| panic!("no pending {} step", step_type));
    stores
        .steps
        .update_step(&step.id, &|step: &mut ProcessStep| {
            step.set_status(ProcessStepStatus::Done, None)
        })
        .await
        .expect("completing manual step");
}
