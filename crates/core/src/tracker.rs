// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory state materialized from WAL replay
//!
//! The tracker holds the authoritative operation and session tables between
//! checkpoints. It is only ever mutated by applying committed WAL entries,
//! which makes recovery trivial: replaying the same entries against an empty
//! tracker (or a checkpoint) reproduces the exact pre-crash state. All
//! timestamps come from the entry being applied, never from a clock.

use crate::operation::{OpState, Operation, OperationId};
use crate::session::{Session, SessionId, SessionState};
use crate::wal::{WalEntry, WalEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Error applying an entry to the tracker
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("entity not found: {kind} {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("entity already exists: {kind} {id}")]
    AlreadyExists { kind: &'static str, id: String },
}

/// Operation and session tables, the single source of truth between
/// checkpoints
#[derive(Debug, Default, Clone)]
pub struct Tracker {
    pub(crate) operations: HashMap<OperationId, Operation>,
    pub(crate) sessions: HashMap<SessionId, Session>,
}

impl Tracker {
    /// Create a new empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a single committed entry
    ///
    /// Mechanical and deterministic: legality was checked before the entry
    /// was committed, so this only fails on a log that references entities
    /// it never created.
    pub fn apply(&mut self, entry: &WalEntry) -> Result<(), ApplyError> {
        let ts = micros_to_datetime(entry.timestamp_micros);

        match &entry.event {
            WalEvent::Created {
                session_id,
                kind,
                payload,
                max_retries,
            } => {
                let id = OperationId(entry.entity_id.clone());
                if self.operations.contains_key(&id) {
                    return Err(ApplyError::AlreadyExists {
                        kind: "operation",
                        id: entry.entity_id.clone(),
                    });
                }
                let op = Operation::new(
                    id.clone(),
                    SessionId(session_id.clone()),
                    kind.clone(),
                    payload.clone(),
                    *max_retries,
                    ts,
                );
                self.operations.insert(id, op);
            }

            WalEvent::Started => {
                let op = self.operation_mut(&entry.entity_id)?;
                op.state = OpState::InProgress;
                op.started_at = Some(ts);
            }

            WalEvent::Progressed { progress } => {
                let op = self.operation_mut(&entry.entity_id)?;
                op.progress = Some(progress.clone());
            }

            WalEvent::Completed { result } => {
                let op = self.operation_mut(&entry.entity_id)?;
                op.state = OpState::Completed;
                op.finished_at = Some(ts);
                op.result = result.clone();
            }

            WalEvent::Failed { error, retry_count } => {
                let op = self.operation_mut(&entry.entity_id)?;
                op.state = OpState::Failed;
                op.finished_at = Some(ts);
                op.last_error = Some(error.clone());
                op.retry_count = *retry_count;
            }

            WalEvent::Requeued {
                reason,
                retry_count,
                manual: _,
            } => {
                let op = self.operation_mut(&entry.entity_id)?;
                op.state = OpState::Queued;
                op.retry_count = *retry_count;
                op.last_error = Some(reason.clone());
                op.started_at = None;
                op.finished_at = None;
                op.result = None;
                // progress is kept so a fresh attempt can resume from it
            }

            WalEvent::Cancelled { reason } => {
                let op = self.operation_mut(&entry.entity_id)?;
                op.state = OpState::Cancelled;
                op.finished_at = Some(ts);
                if reason.is_some() {
                    op.last_error = reason.clone();
                }
            }

            WalEvent::SessionStarted => {
                let id = SessionId(entry.entity_id.clone());
                if self.sessions.contains_key(&id) {
                    return Err(ApplyError::AlreadyExists {
                        kind: "session",
                        id: entry.entity_id.clone(),
                    });
                }
                self.sessions.insert(id.clone(), Session::new(id, ts));
            }

            WalEvent::SessionHeartbeat => {
                let session = self.session_mut(&entry.entity_id)?;
                session.last_heartbeat_at = ts;
            }

            WalEvent::SessionResumed => {
                let session = self.session_mut(&entry.entity_id)?;
                session.state = SessionState::Active;
                session.last_heartbeat_at = ts;
                session.disconnected_at = None;
                session.resumes += 1;
            }

            WalEvent::SessionDisconnected => {
                let session = self.session_mut(&entry.entity_id)?;
                session.state = SessionState::Disconnected;
                session.disconnected_at = Some(ts);
                session.connection_drops += 1;
            }

            WalEvent::SessionEnded { reason } => {
                let session = self.session_mut(&entry.entity_id)?;
                session.state = SessionState::Ended;
                session.ended_at = Some(ts);
                session.end_reason = reason.clone();
            }

            WalEvent::Checkpoint { wal_sequence } => {
                // live sessions note the checkpoint now covering them
                for session in self.sessions.values_mut() {
                    if session.state != SessionState::Ended {
                        session.last_checkpoint_sequence = *wal_sequence;
                    }
                }
            }
        }

        Ok(())
    }

    /// Get an operation by id
    pub fn operation(&self, id: &OperationId) -> Option<&Operation> {
        self.operations.get(id)
    }

    /// Get a session by id
    pub fn session(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// All operations, sorted by id for stable output
    pub fn operations(&self) -> Vec<&Operation> {
        let mut ops: Vec<_> = self.operations.values().collect();
        ops.sort_by(|a, b| a.id.cmp(&b.id));
        ops
    }

    /// All sessions, sorted by id for stable output
    pub fn sessions(&self) -> Vec<&Session> {
        let mut sessions: Vec<_> = self.sessions.values().collect();
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        sessions
    }

    /// Operations owned by a session, sorted by id
    pub fn operations_for_session(&self, session_id: &SessionId) -> Vec<&Operation> {
        let mut ops: Vec<_> = self
            .operations
            .values()
            .filter(|op| &op.session_id == session_id)
            .collect();
        ops.sort_by(|a, b| a.id.cmp(&b.id));
        ops
    }

    /// Operations currently in the given state, sorted by id
    pub fn operations_in_state(&self, state: OpState) -> Vec<&Operation> {
        let mut ops: Vec<_> = self
            .operations
            .values()
            .filter(|op| op.state == state)
            .collect();
        ops.sort_by(|a, b| a.id.cmp(&b.id));
        ops
    }

    /// Summary of all tracked operations
    pub fn status_summary(&self) -> StatusSummary {
        let mut by_state = BTreeMap::new();
        for op in self.operations.values() {
            *by_state.entry(op.state.as_str().to_string()).or_insert(0) += 1;
        }

        StatusSummary {
            total_operations: self.operations.len(),
            total_sessions: self.sessions.len(),
            by_state,
            in_progress: ids_of(self.operations_in_state(OpState::InProgress)),
            queued: ids_of(self.operations_in_state(OpState::Queued)),
            failed: ids_of(self.operations_in_state(OpState::Failed)),
        }
    }

    fn operation_mut(&mut self, id: &str) -> Result<&mut Operation, ApplyError> {
        self.operations
            .get_mut(&OperationId(id.to_string()))
            .ok_or_else(|| ApplyError::NotFound {
                kind: "operation",
                id: id.to_string(),
            })
    }

    fn session_mut(&mut self, id: &str) -> Result<&mut Session, ApplyError> {
        self.sessions
            .get_mut(&SessionId(id.to_string()))
            .ok_or_else(|| ApplyError::NotFound {
                kind: "session",
                id: id.to_string(),
            })
    }
}

fn ids_of(ops: Vec<&Operation>) -> Vec<OperationId> {
    ops.into_iter().map(|op| op.id.clone()).collect()
}

/// Counts and id lists describing the current tracker contents
#[derive(Debug, Clone, Serialize)]
pub struct StatusSummary {
    pub total_operations: usize,
    pub total_sessions: usize,
    pub by_state: BTreeMap<String, usize>,
    pub in_progress: Vec<OperationId>,
    pub queued: Vec<OperationId>,
    pub failed: Vec<OperationId>,
}

/// Convert entry timestamps back to wall-clock time
pub(crate) fn micros_to_datetime(micros: u64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros as i64).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
#[path = "tracker_tests.rs"]
mod tests;
