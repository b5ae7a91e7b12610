//! Heartbeat reconciliation: disconnects, requeues, grace expiry, resume.

use crate::prelude::*;
use opkeep_core::{DurabilityConfig, OpState, Supervisor};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn timed_out_operation_is_requeued_with_one_retry() {
    // Scenario: max_retries = 2; the operation exceeds its in_progress
    // budget; the sweep requeues it with retry_count == 1
    let engine = Engine::new();
    let manager = engine.open();
    let session_id = manager.start_session().unwrap();
    let op_id = manager
        .submit_operation_with_retries(&session_id, "build", json!(null), 2)
        .unwrap();
    manager.start_operation(&op_id).unwrap();

    // stay connected while the operation overstays max_in_progress
    let budget = engine.config.heartbeat.max_in_progress;
    let step = Duration::from_secs(60);
    let mut elapsed = Duration::ZERO;
    while elapsed <= budget {
        engine.clock.advance(step);
        elapsed += step;
        manager.heartbeat(&session_id).unwrap();
    }

    manager.sweep().unwrap();

    let op = manager.operation_status(&op_id).unwrap();
    assert_eq!(op.state, OpState::Queued);
    assert_eq!(op.retry_count, 1);
}

#[test]
fn disconnect_requeues_or_exhausts_by_retry_budget() {
    // When the sweep fires past disconnect_timeout, in_progress work with
    // retries left becomes queued (retry_count + 1); exhausted work becomes
    // terminal failed with "connection lost"
    let engine = Engine::new();
    let manager = engine.open();
    let session_id = manager.start_session().unwrap();

    let retryable = manager
        .submit_operation_with_retries(&session_id, "build", json!(null), 3)
        .unwrap();
    let exhausted = manager
        .submit_operation_with_retries(&session_id, "verify", json!(null), 1)
        .unwrap();
    manager.start_operation(&retryable).unwrap();
    manager.start_operation(&exhausted).unwrap();

    engine
        .clock
        .advance(engine.config.heartbeat.disconnect_timeout + Duration::from_secs(1));
    let report = manager.sweep().unwrap();

    assert_eq!(report.disconnected.len(), 1);

    let op = manager.operation_status(&retryable).unwrap();
    assert_eq!(op.state, OpState::Queued);
    assert_eq!(op.retry_count, 1);
    assert_eq!(op.last_error.as_deref(), Some("connection lost"));

    let op = manager.operation_status(&exhausted).unwrap();
    assert_eq!(op.state, OpState::Failed);
    assert_eq!(op.last_error.as_deref(), Some("connection lost"));
}

#[test]
fn grace_expiry_cancels_everything_left() {
    let engine = Engine::new();
    let manager = engine.open();
    let (session_id, op_id) = session_with_op(&manager, "build");

    engine
        .clock
        .advance(engine.config.heartbeat.disconnect_timeout + Duration::from_secs(1));
    manager.sweep().unwrap();

    engine
        .clock
        .advance(engine.config.heartbeat.grace_period + Duration::from_secs(1));
    manager.sweep().unwrap();

    assert!(manager.session_status(&session_id).unwrap().is_ended());
    let op = manager.operation_status(&op_id).unwrap();
    assert_eq!(op.state, OpState::Cancelled);
    assert_eq!(op.last_error.as_deref(), Some("session ended"));
}

#[test]
fn resume_within_grace_restores_the_session() {
    let engine = Engine::new();
    let manager = engine.open();
    let session_id = manager.start_session().unwrap();

    // progress-bearing op resumes; plain op restarts fresh
    let tracked = manager
        .submit_operation(&session_id, "transfer", json!({"bytes": 1 << 20}))
        .unwrap();
    manager.start_operation(&tracked).unwrap();
    manager
        .record_progress(&tracked, json!({"offset": 524288}))
        .unwrap();

    let plain = manager
        .submit_operation(&session_id, "build", json!(null))
        .unwrap();
    manager.start_operation(&plain).unwrap();

    engine
        .clock
        .advance(engine.config.heartbeat.disconnect_timeout + Duration::from_secs(1));
    manager.sweep().unwrap();

    let report = manager.resume_session(&session_id).unwrap();

    assert_eq!(report.resumable, vec![tracked.clone()]);
    assert_eq!(report.restart, vec![plain]);
    assert!(manager.session_status(&session_id).unwrap().is_active());

    // the resumed executor still sees the recorded progress
    let op = manager.operation_status(&tracked).unwrap();
    assert_eq!(op.progress, Some(json!({"offset": 524288})));
}

#[test]
fn reconciliation_survives_a_crash_between_sweeps() {
    let engine = Engine::new();
    {
        let manager = engine.open();
        let (_, op_id) = session_with_op(&manager, "build");
        manager.start_operation(&op_id).unwrap();

        engine
            .clock
            .advance(engine.config.heartbeat.disconnect_timeout + Duration::from_secs(1));
        manager.sweep().unwrap();
    }

    // crash, reopen: the disconnect and requeue are durable
    let manager = engine.open();
    let summary = manager.status_summary();
    assert_eq!(summary.queued.len(), 1);
    assert!(manager.list_sessions()[0].is_disconnected());
}

#[tokio::test(start_paused = true)]
async fn supervisor_runs_the_sweep_without_external_scheduling() {
    let engine = Engine::new();
    let manager = Arc::new(engine.open());
    let (session_id, op_id) = session_with_op(&manager, "build");
    manager.start_operation(&op_id).unwrap();

    engine
        .clock
        .advance(engine.config.heartbeat.disconnect_timeout + Duration::from_secs(1));

    let supervisor = Supervisor::spawn(manager.clone());
    tokio::time::sleep(Duration::from_millis(10)).await;
    supervisor.shutdown().await;

    assert!(manager.session_status(&session_id).unwrap().is_disconnected());
    assert_eq!(
        manager.operation_status(&op_id).unwrap().state,
        OpState::Queued
    );
}

#[test]
fn default_config_is_used_when_none_is_given() {
    let config = DurabilityConfig::default();
    assert!(config.heartbeat.disconnect_timeout < config.heartbeat.grace_period);
}
