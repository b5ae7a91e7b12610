// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operation state machine
//!
//! An operation is a trackable unit of requested work with an opaque kind
//! and payload. The engine never interprets what an operation *does*; it
//! only tracks that it was requested, started, progressed, and finished.
//!
//! States: `queued -> in_progress -> {completed, cancelled}`,
//! `in_progress -> failed` (requeued while retries remain), and
//! `queued | in_progress -> cancelled`. `completed`, exhausted `failed`,
//! and `cancelled` are terminal.

use crate::session::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for an operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(pub String);

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for OperationId {
    fn from(s: String) -> Self {
        OperationId(s)
    }
}

impl From<&str> for OperationId {
    fn from(s: &str) -> Self {
        OperationId(s.to_string())
    }
}

/// The state of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpState {
    /// Waiting to be picked up by an executor
    Queued,
    /// Currently executing
    InProgress,
    /// Finished successfully
    Completed,
    /// Retries exhausted; inspectable but final
    Failed,
    /// Cancelled from queued or in_progress
    Cancelled,
}

impl OpState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpState::Queued => "queued",
            OpState::InProgress => "in_progress",
            OpState::Completed => "completed",
            OpState::Failed => "failed",
            OpState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A tracked unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub session_id: SessionId,
    /// Opaque tag interpreted by the executing collaborator
    pub kind: String,
    /// Opaque payload descriptor; never parsed here
    pub payload: serde_json::Value,
    pub state: OpState,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Last recorded incremental progress, if the kind emits any.
    /// A requeued operation keeps this so a resumed executor can
    /// continue instead of restarting from scratch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<serde_json::Value>,
}

impl Operation {
    /// Create a new operation in the Queued state
    pub fn new(
        id: impl Into<OperationId>,
        session_id: SessionId,
        kind: impl Into<String>,
        payload: serde_json::Value,
        max_retries: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Operation {
            id: id.into(),
            session_id,
            kind: kind.into(),
            payload,
            state: OpState::Queued,
            retry_count: 0,
            max_retries,
            created_at,
            started_at: None,
            finished_at: None,
            last_error: None,
            result: None,
            progress: None,
        }
    }

    /// Check if the operation may transition to in_progress
    pub fn can_start(&self) -> bool {
        self.state == OpState::Queued
    }

    /// Check if the operation may record progress or finish
    pub fn can_finish(&self) -> bool {
        self.state == OpState::InProgress
    }

    /// Check if the operation may be cancelled
    pub fn can_cancel(&self) -> bool {
        matches!(self.state, OpState::Queued | OpState::InProgress)
    }

    /// Check if the operation is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            OpState::Completed | OpState::Failed | OpState::Cancelled
        )
    }

    /// Whether the next failure requeues rather than exhausts.
    ///
    /// `retry_count` counts attempts consumed so far; failure number
    /// `max_retries` is the one that sticks.
    pub fn next_failure_requeues(&self) -> bool {
        self.retry_count + 1 < self.max_retries
    }

    /// Whether the operation carries recorded progress to resume from
    pub fn has_progress(&self) -> bool {
        self.progress.is_some()
    }
}

#[cfg(test)]
#[path = "operation_tests.rs"]
mod tests;
