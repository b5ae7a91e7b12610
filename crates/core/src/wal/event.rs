// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WAL event types
//!
//! Every state transition in the system is represented as a typed event.
//! These events are the source of truth: recovery replays them against an
//! empty tracker to rebuild the exact pre-crash state, so each event must
//! carry everything its application needs.

use serde::{Deserialize, Serialize};

/// All state-transition events recorded in the write-ahead log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WalEvent {
    /// Operation submitted
    Created {
        session_id: String,
        kind: String,
        payload: serde_json::Value,
        max_retries: u32,
    },
    /// Operation picked up by an executor
    Started,
    /// Incremental progress reported by the executor
    Progressed { progress: serde_json::Value },
    /// Operation finished successfully
    Completed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
    },
    /// Operation failed with retries exhausted; terminal
    Failed { error: String, retry_count: u32 },
    /// Operation failed (or was retried) and went back to queued.
    /// `retry_count` is the count after this requeue; `manual` marks an
    /// operator-requested retry, which is allowed even past exhaustion.
    Requeued {
        reason: String,
        retry_count: u32,
        #[serde(default)]
        manual: bool,
    },
    /// Operation cancelled
    Cancelled {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Session created
    SessionStarted,
    /// Liveness signal from the session's connection
    SessionHeartbeat,
    /// Disconnected session came back within the grace period
    SessionResumed,
    /// Heartbeat went stale past the disconnect timeout
    SessionDisconnected,
    /// Session ended, explicitly or by grace-period expiry
    SessionEnded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Marker recording that a checkpoint covering `wal_sequence` was
    /// published; applies no state, useful for audit
    Checkpoint { wal_sequence: u64 },
}

impl WalEvent {
    /// The event kind tag as persisted, for logging and summaries
    pub fn kind(&self) -> &'static str {
        match self {
            WalEvent::Created { .. } => "created",
            WalEvent::Started => "started",
            WalEvent::Progressed { .. } => "progressed",
            WalEvent::Completed { .. } => "completed",
            WalEvent::Failed { .. } => "failed",
            WalEvent::Requeued { .. } => "requeued",
            WalEvent::Cancelled { .. } => "cancelled",
            WalEvent::SessionStarted => "session_started",
            WalEvent::SessionHeartbeat => "session_heartbeat",
            WalEvent::SessionResumed => "session_resumed",
            WalEvent::SessionDisconnected => "session_disconnected",
            WalEvent::SessionEnded { .. } => "session_ended",
            WalEvent::Checkpoint { .. } => "checkpoint",
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
