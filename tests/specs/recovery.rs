//! Crash recovery: checkpoint + WAL replay reconstructs the exact
//! pre-crash state.

use crate::prelude::*;
use opkeep_core::OpState;
use serde_json::json;
use std::time::Duration;

#[test]
fn crash_before_complete_leaves_operation_in_progress() {
    // Scenario: submit a "build" operation, start it, then the process
    // dies before complete() is ever appended.
    let engine = Engine::new();
    let (_, op_id) = {
        let manager = engine.open();
        let (session_id, op_id) = session_with_op(&manager, "build");
        manager.start_operation(&op_id).unwrap();
        (session_id, op_id)
    };

    let manager = engine.open();

    let op = manager.operation_status(&op_id).unwrap();
    assert_eq!(op.state, OpState::InProgress);
    assert!(op.started_at.is_some());
    assert!(op.finished_at.is_none());
}

#[test]
fn recovered_state_is_byte_for_byte_identical() {
    let engine = Engine::new();

    let before = {
        let manager = engine.open();
        let (session_a, op_a) = session_with_op(&manager, "build");
        let (_session_b, op_b) = session_with_op(&manager, "verify");

        manager.start_operation(&op_a).unwrap();
        manager.record_progress(&op_a, json!({"pct": 30})).unwrap();
        engine.clock.advance(Duration::from_secs(10));
        manager.heartbeat(&session_a).unwrap();

        manager.start_operation(&op_b).unwrap();
        manager.fail_operation(&op_b, "flaky network").unwrap();

        state_json(&manager)
    };

    let manager = engine.open();
    let after = state_json(&manager);

    similar_asserts::assert_eq!(
        serde_json::to_string_pretty(&before).unwrap(),
        serde_json::to_string_pretty(&after).unwrap()
    );
}

#[test]
fn recovery_is_idempotent_across_repeated_crashes() {
    let engine = Engine::new();
    {
        let manager = engine.open();
        let (_, op_id) = session_with_op(&manager, "build");
        manager.start_operation(&op_id).unwrap();
    }

    let first = state_json(&engine.open());
    let second = state_json(&engine.open());
    let third = state_json(&engine.open());

    assert_eq!(first, second);
    assert_eq!(second, third);
}

#[test]
fn corrupt_wal_tail_recovers_to_last_valid_record() {
    let engine = Engine::new();
    let (_, op_id) = {
        let manager = engine.open();
        let (session_id, op_id) = session_with_op(&manager, "build");
        manager.start_operation(&op_id).unwrap();
        (session_id, op_id)
    };

    // A torn write lands after the last durable record
    let wal_path = engine.dir.path().join("wal.jsonl");
    let mut content = std::fs::read_to_string(&wal_path).unwrap();
    content.push_str("{\"sequence\":99,\"half-written");
    std::fs::write(&wal_path, &content).unwrap();

    let manager = engine.open();

    // The valid prefix survives; the tail is discarded, not guessed at
    assert_eq!(
        manager.operation_status(&op_id).unwrap().state,
        OpState::InProgress
    );

    // The log accepts appends again after recovery
    manager.complete_operation(&op_id, None).unwrap();
    assert_eq!(
        manager.operation_status(&op_id).unwrap().state,
        OpState::Completed
    );
}

#[test]
fn terminal_operations_survive_recovery_for_inspection() {
    let engine = Engine::new();
    let (cancelled, failed) = {
        let manager = engine.open();
        let (session_id, cancelled) = session_with_op(&manager, "build");
        let failed = manager
            .submit_operation_with_retries(&session_id, "verify", json!(null), 1)
            .unwrap();

        manager.cancel_operation(&cancelled, Some("superseded")).unwrap();
        manager.start_operation(&failed).unwrap();
        manager.fail_operation(&failed, "no such target").unwrap();
        (cancelled, failed)
    };

    let manager = engine.open();

    let op = manager.operation_status(&cancelled).unwrap();
    assert_eq!(op.state, OpState::Cancelled);
    assert_eq!(op.last_error.as_deref(), Some("superseded"));

    let op = manager.operation_status(&failed).unwrap();
    assert_eq!(op.state, OpState::Failed);
    assert_eq!(op.last_error.as_deref(), Some("no such target"));
}
