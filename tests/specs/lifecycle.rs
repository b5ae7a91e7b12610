//! Operation state machine: retry exhaustion and terminal stability.

use crate::prelude::*;
use opkeep_core::{ManagerError, OpState};
use serde_json::json;

#[test]
fn three_failures_with_three_retries_is_terminal() {
    // Scenario: max_retries = 3, three consecutive failures
    let engine = Engine::new();
    let manager = engine.open();
    let session_id = manager.start_session().unwrap();
    let op_id = manager
        .submit_operation_with_retries(&session_id, "build", json!(null), 3)
        .unwrap();

    for _ in 0..2 {
        manager.start_operation(&op_id).unwrap();
        assert_eq!(
            manager.fail_operation(&op_id, "boom").unwrap(),
            OpState::Queued
        );
    }
    manager.start_operation(&op_id).unwrap();
    assert_eq!(
        manager.fail_operation(&op_id, "boom").unwrap(),
        OpState::Failed
    );

    // the fourth fail is rejected outright
    let err = manager.fail_operation(&op_id, "boom").unwrap_err();
    assert!(matches!(err, ManagerError::InvalidTransition { .. }));

    // and the record stays inspectable
    let op = manager.operation_status(&op_id).unwrap();
    assert_eq!(op.state, OpState::Failed);
    assert_eq!(op.retry_count, 3);
    assert_eq!(op.last_error.as_deref(), Some("boom"));
}

#[test]
fn completed_operations_never_leave_completed() {
    let engine = Engine::new();
    let manager = engine.open();
    let (_, op_id) = session_with_op(&manager, "build");
    manager.start_operation(&op_id).unwrap();
    manager.complete_operation(&op_id, Some(json!("ok"))).unwrap();

    assert!(manager.start_operation(&op_id).is_err());
    assert!(manager.fail_operation(&op_id, "x").is_err());
    assert!(manager.cancel_operation(&op_id, None).is_err());
    assert!(manager.complete_operation(&op_id, None).is_err());
    assert!(manager.retry_operation(&op_id).is_err());

    assert_eq!(
        manager.operation_status(&op_id).unwrap().state,
        OpState::Completed
    );
}

#[test]
fn cancelled_operations_never_leave_cancelled() {
    let engine = Engine::new();
    let manager = engine.open();
    let (_, op_id) = session_with_op(&manager, "build");
    manager.cancel_operation(&op_id, None).unwrap();

    assert!(manager.start_operation(&op_id).is_err());
    assert!(manager.complete_operation(&op_id, None).is_err());
    assert!(manager.fail_operation(&op_id, "x").is_err());
    assert!(manager.retry_operation(&op_id).is_err());

    // repeat cancel is tolerated and changes nothing
    manager.cancel_operation(&op_id, None).unwrap();
    assert_eq!(
        manager.operation_status(&op_id).unwrap().state,
        OpState::Cancelled
    );
}

#[test]
fn unknown_ids_are_not_found() {
    let engine = Engine::new();
    let manager = engine.open();

    assert!(matches!(
        manager.operation_status(&"op-nope".into()).unwrap_err(),
        ManagerError::NotFound { kind: "operation", .. }
    ));
    assert!(matches!(
        manager.start_operation(&"op-nope".into()).unwrap_err(),
        ManagerError::NotFound { .. }
    ));
    assert!(matches!(
        manager.session_status(&"sess-nope".into()).unwrap_err(),
        ManagerError::NotFound { kind: "session", .. }
    ));
}

#[test]
fn errors_leave_unrelated_entries_untouched() {
    let engine = Engine::new();
    let manager = engine.open();
    let (_, healthy) = session_with_op(&manager, "build");
    let (_, poked) = session_with_op(&manager, "verify");

    let before = state_json(&manager);
    let _ = manager.complete_operation(&poked, None).unwrap_err();

    assert_eq!(state_json(&manager), before);
    assert_eq!(
        manager.operation_status(&healthy).unwrap().state,
        OpState::Queued
    );
}
