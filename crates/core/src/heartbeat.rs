// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session liveness monitoring
//!
//! Detects dead client connections and reconciles the operations they own.
//! The planning here is pure: given the tracker, the config, and a point in
//! time it decides what should happen; the manager applies each decision as
//! an ordinary serialized mutation so every sweep outcome lands in the WAL
//! like any caller-initiated transition.

use crate::operation::OpState;
use crate::session::SessionState;
use crate::tracker::Tracker;
use crate::{OperationId, SessionId};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Failure reason recorded when a session's connection goes stale
pub const REASON_CONNECTION_LOST: &str = "connection lost";
/// Cancellation reason recorded when a session ends with work outstanding
pub const REASON_SESSION_ENDED: &str = "session ended";
/// Failure reason recorded when an operation exceeds its in-progress budget
pub const REASON_OPERATION_TIMED_OUT: &str = "operation timed out";
/// End reason recorded when a disconnected session is given up on
pub const REASON_GRACE_EXPIRED: &str = "grace period expired";

/// Liveness thresholds for the periodic sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// An active session with no heartbeat for this long is disconnected
    #[serde(with = "humantime_serde")]
    pub disconnect_timeout: Duration,
    /// A disconnected session is ended after this much further silence
    #[serde(with = "humantime_serde")]
    pub grace_period: Duration,
    /// Maximum time an operation may stay in_progress before the sweep
    /// force-fails it; the coarse tier of the two-tier timeout, distinct
    /// from whatever finer timeout the executor applies to its own work
    #[serde(with = "humantime_serde")]
    pub max_in_progress: Duration,
    /// How often the supervisor runs the sweep
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            disconnect_timeout: Duration::from_secs(120),
            grace_period: Duration::from_secs(600),
            max_in_progress: Duration::from_secs(1800),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// A single decision produced by the sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepAction {
    /// Heartbeat went stale; mark the session disconnected
    Disconnect { session: SessionId },
    /// Re-evaluate an in-progress operation through the normal fail path
    FailOperation { op: OperationId, reason: String },
    /// Disconnection outlived the grace period; end the session
    EndSession { session: SessionId },
    /// Force a non-terminal operation of an ended session to cancelled
    CancelOperation { op: OperationId, reason: String },
}

/// Decide what the sweep should do at `now`
///
/// Actions are ordered so that applying them sequentially is always legal:
/// a session's disconnect precedes the failure of its operations, and an
/// end precedes the cancellations it implies. An operation is touched at
/// most once per sweep.
pub fn plan_sweep(tracker: &Tracker, config: &HeartbeatConfig, now: DateTime<Utc>) -> Vec<SweepAction> {
    let mut actions = Vec::new();
    let mut touched: HashSet<OperationId> = HashSet::new();

    for session in tracker.sessions() {
        match session.state {
            SessionState::Active => {
                if older_than(session.last_heartbeat_at, now, config.disconnect_timeout) {
                    actions.push(SweepAction::Disconnect {
                        session: session.id.clone(),
                    });
                    for op in tracker.operations_for_session(&session.id) {
                        if op.state == OpState::InProgress {
                            touched.insert(op.id.clone());
                            actions.push(SweepAction::FailOperation {
                                op: op.id.clone(),
                                reason: REASON_CONNECTION_LOST.to_string(),
                            });
                        }
                    }
                }
            }
            SessionState::Disconnected => {
                let expired = session
                    .disconnected_at
                    .map(|at| older_than(at, now, config.grace_period))
                    .unwrap_or(false);
                if expired {
                    actions.push(SweepAction::EndSession {
                        session: session.id.clone(),
                    });
                    for op in tracker.operations_for_session(&session.id) {
                        if !op.is_terminal() {
                            touched.insert(op.id.clone());
                            actions.push(SweepAction::CancelOperation {
                                op: op.id.clone(),
                                reason: REASON_SESSION_ENDED.to_string(),
                            });
                        }
                    }
                }
            }
            SessionState::Ended => {}
        }
    }

    // Coarse per-operation timeout, independent of session liveness
    for op in tracker.operations_in_state(OpState::InProgress) {
        if touched.contains(&op.id) {
            continue;
        }
        let timed_out = op
            .started_at
            .map(|at| older_than(at, now, config.max_in_progress))
            .unwrap_or(false);
        if timed_out {
            actions.push(SweepAction::FailOperation {
                op: op.id.clone(),
                reason: REASON_OPERATION_TIMED_OUT.to_string(),
            });
        }
    }

    actions
}

/// Whether `then` lies more than `window` before `now`
fn older_than(then: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    let window = ChronoDuration::from_std(window).unwrap_or(ChronoDuration::MAX);
    now.signed_duration_since(then) > window
}

#[cfg(test)]
#[path = "heartbeat_tests.rs"]
mod tests;
