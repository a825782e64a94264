//! Engine behaviour against both store backends
//!
//! Each test repeats its scenario for every [`Backend`] on fresh stores.

use std::sync::Arc;

use onboard_core::testing::ScriptedProcessTypeExecutor;
use onboard_core::{CoreError, ProcessStepStatus, StepError, StepExecutionResult};
use onboard_tests::{
    create_process_with_steps, executor_for, open_stores, run_to_end, step_statuses, step_types_of,
    Backend,
};
use pretty_assertions::assert_eq;

const KIND: &str = "APPLICATION_CHECKLIST";

fn statuses(expected: &[(&str, ProcessStepStatus)]) -> Vec<(String, ProcessStepStatus)> {
    expected
        .iter()
        .map(|(step_type, status)| (step_type.to_string(), *status))
        .collect()
}

#[tokio::test]
async fn single_pending_step_is_executed() {
    for backend in Backend::ALL {
        let stores = open_stores(backend).await;
        let definition = Arc::new(
            ScriptedProcessTypeExecutor::new(KIND).with_executable_step_types(["TYPE_X"]),
        );
        let executor = executor_for(definition.clone(), &stores);
        let (process_id, steps) = create_process_with_steps(&stores, KIND, &["TYPE_X"]).await;

        let outcomes = run_to_end(&executor, &process_id, KIND).await;

        assert_eq!(outcomes, vec![Ok(false), Ok(true)], "{:?}", backend);
        let stored = stores.steps.load_steps(&process_id).await.unwrap();
        assert_eq!(stored[0].id, steps[0].id);
        assert_eq!(stored[0].status, ProcessStepStatus::Done);
        assert!(stored[0].date_last_changed.is_some());
    }
}

#[tokio::test]
async fn duplicate_rows_collapse_into_one_execution() {
    for backend in Backend::ALL {
        let stores = open_stores(backend).await;
        let definition = Arc::new(
            ScriptedProcessTypeExecutor::new(KIND).with_executable_step_types(["TYPE_X"]),
        );
        let executor = executor_for(definition.clone(), &stores);
        let (process_id, _) =
            create_process_with_steps(&stores, KIND, &["TYPE_X", "TYPE_X", "TYPE_X"]).await;

        let outcomes = run_to_end(&executor, &process_id, KIND).await;

        assert_eq!(outcomes, vec![Ok(false), Ok(true), Ok(true), Ok(true)], "{:?}", backend);
        assert_eq!(definition.executed_step_types(), vec!["TYPE_X"]);
        assert_eq!(
            step_statuses(&stores, &process_id).await,
            statuses(&[
                ("TYPE_X", ProcessStepStatus::Done),
                ("TYPE_X", ProcessStepStatus::Duplicate),
                ("TYPE_X", ProcessStepStatus::Duplicate),
            ])
        );
    }
}

#[tokio::test]
async fn process_without_executable_steps_is_left_alone() {
    for backend in Backend::ALL {
        let stores = open_stores(backend).await;
        let definition = Arc::new(
            ScriptedProcessTypeExecutor::new(KIND).with_executable_step_types(["TYPE_X"]),
        );
        let executor = executor_for(definition.clone(), &stores);
        let (process_id, _) =
            create_process_with_steps(&stores, KIND, &["VERIFY_REGISTRATION_DATA"]).await;

        let outcomes = run_to_end(&executor, &process_id, KIND).await;

        assert_eq!(outcomes, vec![Ok(false)], "{:?}", backend);
        assert!(definition.calls().is_empty());
        let stored = stores.steps.load_steps(&process_id).await.unwrap();
        assert_eq!(stored[0].status, ProcessStepStatus::Todo);
        assert!(stored[0].date_last_changed.is_none());
    }
}

#[tokio::test]
async fn empty_process_is_bootstrapped_and_run() {
    for backend in Backend::ALL {
        let stores = open_stores(backend).await;
        let definition = Arc::new(
            ScriptedProcessTypeExecutor::new(KIND)
                .with_executable_step_types(["TYPE_Y"])
                .with_bootstrap(["TYPE_Y"]),
        );
        let executor = executor_for(definition.clone(), &stores);
        let (process_id, _) = create_process_with_steps(&stores, KIND, &[]).await;

        let outcomes = run_to_end(&executor, &process_id, KIND).await;

        assert_eq!(outcomes, vec![Ok(true), Ok(true)], "{:?}", backend);
        assert_eq!(definition.initializations(), vec![step_types_of(&[])]);
        assert_eq!(
            step_statuses(&stores, &process_id).await,
            statuses(&[("TYPE_Y", ProcessStepStatus::Done)])
        );
    }
}

#[tokio::test]
async fn skipped_step_is_not_executed() {
    for backend in Backend::ALL {
        let stores = open_stores(backend).await;
        let definition = Arc::new(
            ScriptedProcessTypeExecutor::new(KIND).with_executable_step_types(["TYPE_A", "TYPE_B"]),
        );
        definition.respond_once(
            "TYPE_A",
            Ok(StepExecutionResult::done().skip(step_types_of(&["TYPE_B"]))),
        );
        let executor = executor_for(definition.clone(), &stores);
        let (process_id, _) = create_process_with_steps(&stores, KIND, &["TYPE_A", "TYPE_B"]).await;

        let outcomes = run_to_end(&executor, &process_id, KIND).await;

        assert_eq!(outcomes, vec![Ok(false), Ok(true), Ok(true)], "{:?}", backend);
        assert_eq!(definition.executed_step_types(), vec!["TYPE_A"]);
        assert_eq!(
            step_statuses(&stores, &process_id).await,
            statuses(&[
                ("TYPE_A", ProcessStepStatus::Done),
                ("TYPE_B", ProcessStepStatus::Skipped),
            ])
        );
    }
}

#[tokio::test]
async fn business_failure_is_contained() {
    for backend in Backend::ALL {
        let stores = open_stores(backend).await;
        let definition = Arc::new(
            ScriptedProcessTypeExecutor::new(KIND).with_executable_step_types(["TYPE_A", "TYPE_B"]),
        );
        definition.respond_once("TYPE_A", Err(StepError::business("company name already taken")));
        let executor = executor_for(definition.clone(), &stores);
        let (process_id, _) = create_process_with_steps(&stores, KIND, &["TYPE_A", "TYPE_B"]).await;

        let outcomes = run_to_end(&executor, &process_id, KIND).await;

        assert_eq!(outcomes, vec![Ok(false), Ok(true), Ok(true)], "{:?}", backend);
        let stored = stores.steps.load_steps(&process_id).await.unwrap();
        assert_eq!(stored[0].status, ProcessStepStatus::Failed);
        assert_eq!(stored[0].message.as_deref(), Some("company name already taken"));
        assert_eq!(stored[1].status, ProcessStepStatus::Done);
    }
}

#[tokio::test]
async fn fatal_failure_aborts_remaining_step_types() {
    for backend in Backend::ALL {
        let stores = open_stores(backend).await;
        let definition = Arc::new(
            ScriptedProcessTypeExecutor::new(KIND)
                .with_executable_step_types(["TYPE_A", "TYPE_B", "TYPE_C"]),
        );
        definition.respond_once("TYPE_B", Err(StepError::fatal("unexpected response")));
        let executor = executor_for(definition.clone(), &stores);
        let (process_id, _) =
            create_process_with_steps(&stores, KIND, &["TYPE_A", "TYPE_B", "TYPE_C"]).await;

        let outcomes = run_to_end(&executor, &process_id, KIND).await;

        assert_eq!(outcomes.len(), 3, "{:?}", backend);
        assert_eq!(outcomes[..2].to_vec(), vec![Ok(false), Ok(true)]);
        assert!(matches!(outcomes[2], Err(CoreError::StepExecutionError(_))));
        assert_eq!(definition.executed_step_types(), vec!["TYPE_A", "TYPE_B"]);
        assert_eq!(
            step_statuses(&stores, &process_id).await,
            statuses(&[
                ("TYPE_A", ProcessStepStatus::Done),
                ("TYPE_B", ProcessStepStatus::Todo),
                ("TYPE_C", ProcessStepStatus::Todo),
            ])
        );
    }
}

#[tokio::test]
async fn retryable_failure_records_message_and_stays_pending() {
    for backend in Backend::ALL {
        let stores = open_stores(backend).await;
        let definition = Arc::new(
            ScriptedProcessTypeExecutor::new(KIND).with_executable_step_types(["CREATE_WALLET"]),
        );
        definition.respond_once("CREATE_WALLET", Err(StepError::retryable("wallet service down")));
        let executor = executor_for(definition.clone(), &stores);
        let (process_id, _) =
            create_process_with_steps(&stores, KIND, &["CREATE_WALLET", "CREATE_WALLET"]).await;

        let outcomes = run_to_end(&executor, &process_id, KIND).await;

        assert_eq!(outcomes, vec![Ok(false), Ok(true), Ok(true)], "{:?}", backend);
        let stored = stores.steps.load_steps(&process_id).await.unwrap();
        assert_eq!(stored[0].status, ProcessStepStatus::Todo);
        assert_eq!(stored[0].message.as_deref(), Some("wallet service down"));
        assert_eq!(stored[1].status, ProcessStepStatus::Duplicate);
    }
}

#[tokio::test]
async fn not_ready_step_is_not_written() {
    for backend in Backend::ALL {
        let stores = open_stores(backend).await;
        let definition = Arc::new(
            ScriptedProcessTypeExecutor::new(KIND).with_executable_step_types(["CREATE_BPN"]),
        );
        definition.respond_once("CREATE_BPN", Ok(StepExecutionResult::not_ready()));
        let executor = executor_for(definition.clone(), &stores);
        let (process_id, _) = create_process_with_steps(&stores, KIND, &["CREATE_BPN"]).await;

        let outcomes = run_to_end(&executor, &process_id, KIND).await;

        assert_eq!(outcomes, vec![Ok(false), Ok(false)], "{:?}", backend);
        let stored = stores.steps.load_steps(&process_id).await.unwrap();
        assert!(stored[0].is_pending());
        assert!(stored[0].date_last_changed.is_none());
    }
}

#[tokio::test]
async fn scheduling_is_idempotent_across_runs() {
    for backend in Backend::ALL {
        let stores = open_stores(backend).await;
        let definition = Arc::new(
            ScriptedProcessTypeExecutor::new(KIND).with_executable_step_types(["TYPE_A", "TYPE_X"]),
        );
        definition.respond_always(
            "TYPE_A",
            Ok(StepExecutionResult::done().schedule(step_types_of(&["TYPE_X"]))),
        );
        let executor = executor_for(definition.clone(), &stores);
        let (process_id, _) = create_process_with_steps(&stores, KIND, &["TYPE_A"]).await;

        let first = run_to_end(&executor, &process_id, KIND).await;
        assert_eq!(first, vec![Ok(false), Ok(true), Ok(true)], "{:?}", backend);
        assert_eq!(definition.executed_step_types(), vec!["TYPE_A", "TYPE_X"]);

        // Nothing pending, nothing executed
        let second = run_to_end(&executor, &process_id, KIND).await;
        assert_eq!(second, vec![Ok(false)]);
        assert_eq!(definition.executed_step_types(), vec!["TYPE_A", "TYPE_X"]);

        // A fresh row of A schedules X again, which runs exactly once
        stores
            .steps
            .create_steps(&process_id, &step_types_of(&["TYPE_A"]))
            .await
            .unwrap();
        let third = run_to_end(&executor, &process_id, KIND).await;
        assert_eq!(third, vec![Ok(false), Ok(true), Ok(true)]);
        assert_eq!(
            definition.executed_step_types(),
            vec!["TYPE_A", "TYPE_X", "TYPE_A", "TYPE_X"]
        );
        assert_eq!(
            step_statuses(&stores, &process_id).await,
            statuses(&[
                ("TYPE_A", ProcessStepStatus::Done),
                ("TYPE_X", ProcessStepStatus::Done),
                ("TYPE_A", ProcessStepStatus::Done),
                ("TYPE_X", ProcessStepStatus::Done),
            ])
        );
    }
}

#[tokio::test]
async fn rescheduling_the_executed_type_waits_for_the_next_run() {
    for backend in Backend::ALL {
        let stores = open_stores(backend).await;
        let definition = Arc::new(
            ScriptedProcessTypeExecutor::new(KIND).with_executable_step_types(["POLL_CLEARINGHOUSE"]),
        );
        definition.respond_once(
            "POLL_CLEARINGHOUSE",
            Ok(StepExecutionResult::done().schedule(step_types_of(&["POLL_CLEARINGHOUSE"]))),
        );
        let executor = executor_for(definition.clone(), &stores);
        let (process_id, _) =
            create_process_with_steps(&stores, KIND, &["POLL_CLEARINGHOUSE"]).await;

        let first = run_to_end(&executor, &process_id, KIND).await;
        assert_eq!(first, vec![Ok(false), Ok(true)], "{:?}", backend);
        assert_eq!(
            step_statuses(&stores, &process_id).await,
            statuses(&[
                ("POLL_CLEARINGHOUSE", ProcessStepStatus::Done),
                ("POLL_CLEARINGHOUSE", ProcessStepStatus::Todo),
            ])
        );

        let second = run_to_end(&executor, &process_id, KIND).await;
        assert_eq!(second, vec![Ok(false), Ok(true)]);
        assert_eq!(definition.executed_step_types().len(), 2);
    }
}

#[tokio::test]
async fn other_step_types_exclude_the_executed_one() {
    for backend in Backend::ALL {
        let stores = open_stores(backend).await;
        let definition = Arc::new(
            ScriptedProcessTypeExecutor::new(KIND).with_executable_step_types(["TYPE_A", "TYPE_B"]),
        );
        let executor = executor_for(definition.clone(), &stores);
        let (process_id, _) =
            create_process_with_steps(&stores, KIND, &["TYPE_A", "MANUAL_REVIEW", "TYPE_B"]).await;

        run_to_end(&executor, &process_id, KIND).await;

        let calls = definition.calls();
        assert_eq!(calls.len(), 2, "{:?}", backend);
        assert_eq!(calls[0].other_step_types, step_types_of(&["MANUAL_REVIEW", "TYPE_B"]));
        assert_eq!(calls[1].other_step_types, step_types_of(&["MANUAL_REVIEW"]));
    }
}

#[tokio::test]
async fn cancellation_stops_before_the_next_step_type() {
    for backend in Backend::ALL {
        let stores = open_stores(backend).await;
        let definition = Arc::new(
            ScriptedProcessTypeExecutor::new(KIND)
                .with_executable_step_types(["TYPE_A", "TYPE_B"])
                .with_cancel_after("TYPE_A"),
        );
        let executor = executor_for(definition.clone(), &stores);
        let (process_id, _) = create_process_with_steps(&stores, KIND, &["TYPE_A", "TYPE_B"]).await;

        let outcomes = run_to_end(&executor, &process_id, KIND).await;

        assert_eq!(
            outcomes,
            vec![Ok(false), Ok(true), Err(CoreError::Cancelled)],
            "{:?}",
            backend
        );
        assert_eq!(
            step_statuses(&stores, &process_id).await,
            statuses(&[
                ("TYPE_A", ProcessStepStatus::Done),
                ("TYPE_B", ProcessStepStatus::Todo),
            ])
        );
    }
}
