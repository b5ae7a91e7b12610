//! Checkpoints: atomic publication, truncation safety, stale fallback.

use crate::prelude::*;
use opkeep_core::OpState;
use serde_json::json;

#[test]
fn completed_operation_reconstructs_from_checkpoint_alone() {
    // Scenario: complete an operation, force a checkpoint, truncate the
    // WAL up to it, restart. The state comes purely from the checkpoint.
    let engine = Engine::new();
    let op_id = {
        let manager = engine.open();
        let (_, op_id) = session_with_op(&manager, "build");
        manager.start_operation(&op_id).unwrap();
        manager
            .complete_operation(&op_id, Some(json!("artifact-9")))
            .unwrap();

        manager.checkpoint_now().unwrap();
        manager.compact().unwrap();
        op_id
    };

    let manager = engine.open();

    let op = manager.operation_status(&op_id).unwrap();
    assert_eq!(op.state, OpState::Completed);
    assert_eq!(op.result, Some(json!("artifact-9")));
}

#[test]
fn truncate_never_loses_records_past_the_checkpoint() {
    let engine = Engine::new();
    let (started_after, completed_before) = {
        let manager = engine.open();
        let (session_id, completed_before) = session_with_op(&manager, "build");
        manager.start_operation(&completed_before).unwrap();
        manager.complete_operation(&completed_before, None).unwrap();

        manager.checkpoint_now().unwrap();

        // transitions after the checkpoint, before truncation
        let started_after = manager
            .submit_operation(&session_id, "verify", json!(null))
            .unwrap();
        manager.start_operation(&started_after).unwrap();

        manager.compact().unwrap();
        (started_after, completed_before)
    };

    let manager = engine.open();

    // both the checkpointed record and the post-checkpoint tail survived
    assert_eq!(
        manager.operation_status(&completed_before).unwrap().state,
        OpState::Completed
    );
    assert_eq!(
        manager.operation_status(&started_after).unwrap().state,
        OpState::InProgress
    );
}

#[test]
fn state_after_compaction_matches_state_before() {
    let engine = Engine::new();
    let manager = engine.open();
    let (session_id, op_a) = session_with_op(&manager, "build");
    manager.start_operation(&op_a).unwrap();
    let op_b = manager
        .submit_operation(&session_id, "verify", json!(null))
        .unwrap();
    manager.start_operation(&op_b).unwrap();
    manager.fail_operation(&op_b, "flaky").unwrap();

    manager.checkpoint_now().unwrap();
    let before = state_json(&manager);

    manager.compact().unwrap();
    drop(manager);

    let manager = engine.open();
    similar_asserts::assert_eq!(
        serde_json::to_string_pretty(&before).unwrap(),
        serde_json::to_string_pretty(&state_json(&manager)).unwrap()
    );
}

#[test]
fn corrupt_newest_checkpoint_falls_back_to_older_one() {
    let engine = Engine::new();
    let op_id = {
        let manager = engine.open();
        let (session_id, op_id) = session_with_op(&manager, "build");
        manager.start_operation(&op_id).unwrap();
        manager.complete_operation(&op_id, None).unwrap();
        manager.checkpoint_now().unwrap();

        // a later checkpoint that will be corrupted on disk
        manager
            .submit_operation(&session_id, "verify", json!(null))
            .unwrap();
        manager.checkpoint_now().unwrap();
        op_id
    };

    // corrupt the newest checkpoint file
    let checkpoints_dir = engine.dir.path().join("checkpoints");
    let mut files: Vec<_> = std::fs::read_dir(&checkpoints_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    files.sort();
    let newest = files.last().unwrap();
    std::fs::write(newest, "garbage").unwrap();

    // recovery falls back to the older checkpoint and replays the WAL
    // tail past it, so nothing is lost
    let manager = engine.open();
    assert_eq!(
        manager.operation_status(&op_id).unwrap().state,
        OpState::Completed
    );
    assert_eq!(manager.list_operations().len(), 2);
}

#[test]
fn checkpoints_are_pruned_to_the_configured_keep_count() {
    let mut config = opkeep_core::DurabilityConfig::default();
    config.checkpoint.keep = 2;
    let engine = Engine::with_config(config);
    let manager = engine.open();
    let (session_id, _) = session_with_op(&manager, "build");

    for _ in 0..5 {
        manager
            .submit_operation(&session_id, "build", json!(null))
            .unwrap();
        manager.checkpoint_now().unwrap();
    }

    let count = std::fs::read_dir(engine.dir.path().join("checkpoints"))
        .unwrap()
        .count();
    assert_eq!(count, 2);
}
