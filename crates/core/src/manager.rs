// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session manager: the public entry point of the engine
//!
//! Owns the WAL writer, the in-memory tracker, and the checkpoint store,
//! with an explicit open/close lifecycle per storage root. Every mutating
//! call follows the same path: validate against the tracker, append the
//! transition to the WAL (the commit point, and the only point that
//! blocks), then apply it in memory. Reads work against the tables behind
//! a read lock and never wait on an in-flight append.
//!
//! On open, the manager loads the newest valid checkpoint and replays the
//! WAL tail past its sequence, reconstructing the exact pre-crash state.

use crate::checkpoint::{
    CheckpointError, CheckpointMeta, CheckpointState, CheckpointStore, SnapshotStore,
};
use crate::clock::{Clock, SystemClock};
use crate::config::DurabilityConfig;
use crate::heartbeat::{plan_sweep, SweepAction, REASON_GRACE_EXPIRED, REASON_SESSION_ENDED};
use crate::id::{IdGen, UuidIdGen};
use crate::operation::{OpState, Operation, OperationId};
use crate::session::{Session, SessionId, SessionState};
use crate::tracker::{ApplyError, StatusSummary, Tracker};
use crate::wal::{DurableLog, WalError, WalEvent, WalWriter};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

/// Requeue reason recorded for operator-requested retries
const REASON_MANUAL_RETRY: &str = "manual retry";

/// Errors surfaced by the session manager
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The requested state change is not legal from the current state;
    /// nothing was mutated
    #[error("invalid transition: operation {id} is {state}, cannot {action}")]
    InvalidTransition {
        id: String,
        state: &'static str,
        action: &'static str,
    },
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("session {id} is not active ({state})")]
    SessionNotActive { id: String, state: &'static str },
    /// The WAL append itself failed; fatal for this call, no partial state
    /// was applied
    #[error("durability failure: {0}")]
    Durability(#[from] WalError),
    #[error("checkpoint failure: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("apply error: {0}")]
    Apply(#[from] ApplyError),
}

/// What a resumed session can pick back up
#[derive(Debug, Clone)]
pub struct ResumeReport {
    pub session_id: SessionId,
    /// Times this session has come back after a disconnect
    pub resumes: u32,
    /// Queued operations holding recorded progress; the executor can
    /// continue them from where they left off
    pub resumable: Vec<OperationId>,
    /// Queued operations with no recorded progress; they restart fresh
    pub restart: Vec<OperationId>,
    /// Operations still marked in_progress
    pub in_progress: Vec<OperationId>,
}

/// Outcome of one liveness sweep
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub disconnected: Vec<SessionId>,
    pub ended: Vec<SessionId>,
    pub requeued: Vec<OperationId>,
    pub failed: Vec<OperationId>,
    pub cancelled: Vec<OperationId>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.disconnected.is_empty()
            && self.ended.is_empty()
            && self.requeued.is_empty()
            && self.failed.is_empty()
            && self.cancelled.is_empty()
    }
}

/// Tracks when the next automatic checkpoint is due
struct CheckpointMeter {
    ops_since: u64,
    last_at: DateTime<Utc>,
    last_sequence: Option<u64>,
}

/// Coordinator for durable session and operation tracking
///
/// Generic over the two storage seams (ordered log, snapshot store) and
/// over clock/id generation, so backing storage is swappable and tests can
/// control time. `open` wires up the default file-backed stores.
pub struct SessionManager<L = WalWriter, S = CheckpointStore, C = SystemClock, G = UuidIdGen>
where
    L: DurableLog,
    S: SnapshotStore,
    C: Clock,
    G: IdGen,
{
    config: DurabilityConfig,
    clock: C,
    ids: G,
    wal: Mutex<L>,
    tracker: RwLock<Tracker>,
    checkpoints: S,
    meter: Mutex<CheckpointMeter>,
}

impl SessionManager {
    /// Open or recover an engine at the given storage root
    pub fn open(base_dir: &Path, config: DurabilityConfig) -> Result<Self, ManagerError> {
        Self::open_with(base_dir, config, SystemClock, UuidIdGen)
    }
}

impl<C: Clock, G: IdGen> SessionManager<WalWriter, CheckpointStore, C, G> {
    /// Open the file-backed stores with explicit clock and id generator
    /// (used by tests)
    pub fn open_with(
        base_dir: &Path,
        config: DurabilityConfig,
        clock: C,
        ids: G,
    ) -> Result<Self, ManagerError> {
        std::fs::create_dir_all(base_dir).map_err(WalError::from)?;

        // The writer cuts any corrupt tail off before accepting appends
        let log = WalWriter::open(&base_dir.join("wal.jsonl"))?;
        let snapshots = CheckpointStore::new(&base_dir.join("checkpoints"));
        Self::with_stores(log, snapshots, config, clock, ids)
    }
}

impl<L, S, C, G> SessionManager<L, S, C, G>
where
    L: DurableLog,
    S: SnapshotStore,
    C: Clock,
    G: IdGen,
{
    /// Recover an engine from the given stores: load the newest valid
    /// checkpoint (or start empty), then replay the log tail past its
    /// sequence
    pub fn with_stores(
        log: L,
        snapshots: S,
        config: DurabilityConfig,
        clock: C,
        ids: G,
    ) -> Result<Self, ManagerError> {
        let (mut tracker, start_sequence, covered) = match snapshots.load_latest()? {
            Some((meta, state)) => {
                tracing::info!(
                    checkpoint = %meta.id,
                    wal_sequence = state.wal_sequence,
                    "recovering from checkpoint"
                );
                (state.to_tracker(), state.wal_sequence, Some(meta.wal_sequence))
            }
            None => (Tracker::new(), 0, None),
        };

        let mut replayed = 0u64;
        for entry in log.replay_after(start_sequence)? {
            if let Err(e) = tracker.apply(&entry) {
                tracing::warn!(sequence = entry.sequence, error = %e, "skipping unappliable WAL entry");
                continue;
            }
            replayed += 1;
        }

        tracing::info!(
            operations = tracker.operations().len(),
            sessions = tracker.sessions().len(),
            replayed,
            last_sequence = log.last_sequence(),
            "engine recovered"
        );

        let meter = CheckpointMeter {
            ops_since: replayed,
            last_at: clock.now(),
            last_sequence: covered,
        };

        Ok(Self {
            config,
            clock,
            ids,
            wal: Mutex::new(log),
            tracker: RwLock::new(tracker),
            checkpoints: snapshots,
            meter: Mutex::new(meter),
        })
    }

    pub fn config(&self) -> &DurabilityConfig {
        &self.config
    }

    /// Last committed WAL sequence
    pub fn wal_sequence(&self) -> u64 {
        self.lock_wal().last_sequence()
    }

    // === Sessions ===

    /// Start a new session; it begins active with a fresh heartbeat
    pub fn start_session(&self) -> Result<SessionId, ManagerError> {
        let id = SessionId(format!("sess-{}", self.ids.next()));
        let mut wal = self.lock_wal();
        self.commit_locked(&mut wal, &id.0, WalEvent::SessionStarted)?;
        Ok(id)
    }

    /// Record a liveness signal; a disconnected session becomes active again
    pub fn heartbeat(&self, session_id: &SessionId) -> Result<(), ManagerError> {
        let mut wal = self.lock_wal();
        let state = self.session_state(session_id)?;
        match state {
            SessionState::Active => {
                self.commit_locked(&mut wal, &session_id.0, WalEvent::SessionHeartbeat)?;
            }
            SessionState::Disconnected => {
                tracing::info!(session = %session_id, "session resumed by heartbeat");
                self.commit_locked(&mut wal, &session_id.0, WalEvent::SessionResumed)?;
            }
            SessionState::Ended => {
                return Err(ManagerError::SessionNotActive {
                    id: session_id.0.clone(),
                    state: state.as_str(),
                });
            }
        }
        Ok(())
    }

    /// Resume a session after a dropped connection
    ///
    /// Reports which queued operations carry recorded progress (the
    /// executor can continue them) and which restart fresh.
    pub fn resume_session(&self, session_id: &SessionId) -> Result<ResumeReport, ManagerError> {
        let mut wal = self.lock_wal();
        let state = self.session_state(session_id)?;
        match state {
            SessionState::Active => {
                self.commit_locked(&mut wal, &session_id.0, WalEvent::SessionHeartbeat)?;
            }
            SessionState::Disconnected => {
                self.commit_locked(&mut wal, &session_id.0, WalEvent::SessionResumed)?;
            }
            SessionState::Ended => {
                return Err(ManagerError::SessionNotActive {
                    id: session_id.0.clone(),
                    state: state.as_str(),
                });
            }
        }
        drop(wal);

        let tracker = self.read_tracker();
        let session = tracker
            .session(session_id)
            .ok_or_else(|| not_found("session", &session_id.0))?;
        let mut report = ResumeReport {
            session_id: session_id.clone(),
            resumes: session.resumes,
            resumable: Vec::new(),
            restart: Vec::new(),
            in_progress: Vec::new(),
        };
        for op in tracker.operations_for_session(session_id) {
            match op.state {
                OpState::Queued if op.has_progress() => report.resumable.push(op.id.clone()),
                OpState::Queued => report.restart.push(op.id.clone()),
                OpState::InProgress => report.in_progress.push(op.id.clone()),
                _ => {}
            }
        }
        tracing::info!(
            session = %session_id,
            resumes = report.resumes,
            resumable = report.resumable.len(),
            restart = report.restart.len(),
            "session resumed"
        );
        Ok(report)
    }

    /// End a session, cancelling whatever non-terminal work it still owns.
    /// Idempotent on an already-ended session.
    pub fn end_session(
        &self,
        session_id: &SessionId,
        reason: Option<&str>,
    ) -> Result<(), ManagerError> {
        let mut wal = self.lock_wal();
        let state = self.session_state(session_id)?;
        if state == SessionState::Ended {
            return Ok(());
        }

        let outstanding: Vec<OperationId> = {
            let tracker = self.read_tracker();
            tracker
                .operations_for_session(session_id)
                .into_iter()
                .filter(|op| !op.is_terminal())
                .map(|op| op.id.clone())
                .collect()
        };
        for op_id in outstanding {
            self.commit_locked(
                &mut wal,
                &op_id.0,
                WalEvent::Cancelled {
                    reason: Some(REASON_SESSION_ENDED.to_string()),
                },
            )?;
        }

        self.commit_locked(
            &mut wal,
            &session_id.0,
            WalEvent::SessionEnded {
                reason: reason.map(str::to_string),
            },
        )?;
        Ok(())
    }

    /// Read-only session snapshot
    pub fn session_status(&self, session_id: &SessionId) -> Result<Session, ManagerError> {
        self.read_tracker()
            .session(session_id)
            .cloned()
            .ok_or_else(|| not_found("session", &session_id.0))
    }

    /// All sessions, sorted by id
    pub fn list_sessions(&self) -> Vec<Session> {
        self.read_tracker().sessions().into_iter().cloned().collect()
    }

    // === Operations ===

    /// Submit an operation with the configured default retry budget
    pub fn submit_operation(
        &self,
        session_id: &SessionId,
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<OperationId, ManagerError> {
        self.submit_operation_with_retries(session_id, kind, payload, self.config.default_max_retries)
    }

    /// Submit an operation with an explicit retry budget
    pub fn submit_operation_with_retries(
        &self,
        session_id: &SessionId,
        kind: &str,
        payload: serde_json::Value,
        max_retries: u32,
    ) -> Result<OperationId, ManagerError> {
        let mut wal = self.lock_wal();
        let state = self.session_state(session_id)?;
        if state != SessionState::Active {
            return Err(ManagerError::SessionNotActive {
                id: session_id.0.clone(),
                state: state.as_str(),
            });
        }

        let id = OperationId(format!("op-{}", self.ids.next()));
        self.commit_locked(
            &mut wal,
            &id.0,
            WalEvent::Created {
                session_id: session_id.0.clone(),
                kind: kind.to_string(),
                payload,
                max_retries,
            },
        )?;
        Ok(id)
    }

    /// Mark a queued operation as picked up by an executor
    pub fn start_operation(&self, op_id: &OperationId) -> Result<(), ManagerError> {
        let mut wal = self.lock_wal();
        let op = self.operation_snapshot(op_id)?;
        if !op.can_start() {
            return Err(invalid_transition(&op, "start"));
        }
        self.commit_locked(&mut wal, &op_id.0, WalEvent::Started)?;
        Ok(())
    }

    /// Record incremental progress for an in-progress operation
    pub fn record_progress(
        &self,
        op_id: &OperationId,
        progress: serde_json::Value,
    ) -> Result<(), ManagerError> {
        let mut wal = self.lock_wal();
        let op = self.operation_snapshot(op_id)?;
        if !op.can_finish() {
            return Err(invalid_transition(&op, "record progress"));
        }
        self.commit_locked(&mut wal, &op_id.0, WalEvent::Progressed { progress })?;
        Ok(())
    }

    /// Finish an operation successfully
    pub fn complete_operation(
        &self,
        op_id: &OperationId,
        result: Option<serde_json::Value>,
    ) -> Result<(), ManagerError> {
        let mut wal = self.lock_wal();
        let op = self.operation_snapshot(op_id)?;
        if !op.can_finish() {
            return Err(invalid_transition(&op, "complete"));
        }
        self.commit_locked(&mut wal, &op_id.0, WalEvent::Completed { result })?;
        Ok(())
    }

    /// Record a failure; requeues while attempts remain, otherwise the
    /// operation lands terminally failed with `last_error` populated.
    /// Returns the state the operation ended up in.
    pub fn fail_operation(&self, op_id: &OperationId, error: &str) -> Result<OpState, ManagerError> {
        let mut wal = self.lock_wal();
        let op = self.operation_snapshot(op_id)?;
        if !op.can_finish() {
            return Err(invalid_transition(&op, "fail"));
        }
        self.fail_locked(&mut wal, &op, error)
    }

    /// Cancel an operation; idempotent if already cancelled
    pub fn cancel_operation(
        &self,
        op_id: &OperationId,
        reason: Option<&str>,
    ) -> Result<(), ManagerError> {
        let mut wal = self.lock_wal();
        let op = self.operation_snapshot(op_id)?;
        if op.state == OpState::Cancelled {
            return Ok(());
        }
        if !op.can_cancel() {
            return Err(invalid_transition(&op, "cancel"));
        }
        self.commit_locked(
            &mut wal,
            &op_id.0,
            WalEvent::Cancelled {
                reason: reason.map(str::to_string),
            },
        )?;
        Ok(())
    }

    /// Operator-requested retry of a failed operation, allowed even after
    /// the retry budget is exhausted; logged distinctly from automatic
    /// requeues
    pub fn retry_operation(&self, op_id: &OperationId) -> Result<(), ManagerError> {
        let mut wal = self.lock_wal();
        let op = self.operation_snapshot(op_id)?;
        if op.state != OpState::Failed {
            return Err(invalid_transition(&op, "retry"));
        }
        self.commit_locked(
            &mut wal,
            &op_id.0,
            WalEvent::Requeued {
                reason: REASON_MANUAL_RETRY.to_string(),
                retry_count: op.retry_count + 1,
                manual: true,
            },
        )?;
        Ok(())
    }

    /// Read-only operation snapshot; never blocks or is blocked by writers
    pub fn operation_status(&self, op_id: &OperationId) -> Result<Operation, ManagerError> {
        self.read_tracker()
            .operation(op_id)
            .cloned()
            .ok_or_else(|| not_found("operation", &op_id.0))
    }

    /// All operations, sorted by id
    pub fn list_operations(&self) -> Vec<Operation> {
        self.read_tracker()
            .operations()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Operations owned by a session, sorted by id
    pub fn operations_for_session(&self, session_id: &SessionId) -> Vec<Operation> {
        self.read_tracker()
            .operations_for_session(session_id)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Counts and id lists over everything currently tracked
    pub fn status_summary(&self) -> StatusSummary {
        self.read_tracker().status_summary()
    }

    // === Liveness ===

    /// Run one liveness sweep: disconnect stale sessions, fail or cancel
    /// the work they owned, end sessions past the grace period, and
    /// time out overlong in-progress operations
    pub fn sweep(&self) -> Result<SweepReport, ManagerError> {
        let mut wal = self.lock_wal();
        let now = self.clock.now();
        let actions = {
            let tracker = self.read_tracker();
            plan_sweep(&tracker, &self.config.heartbeat, now)
        };

        let mut report = SweepReport::default();
        for action in actions {
            match action {
                SweepAction::Disconnect { session } => {
                    self.commit_locked(&mut wal, &session.0, WalEvent::SessionDisconnected)?;
                    report.disconnected.push(session);
                }
                SweepAction::FailOperation { op, reason } => {
                    let snapshot = match self.read_tracker().operation(&op).cloned() {
                        Some(s) if s.can_finish() => s,
                        _ => continue,
                    };
                    match self.fail_locked(&mut wal, &snapshot, &reason)? {
                        OpState::Queued => report.requeued.push(op),
                        _ => report.failed.push(op),
                    }
                }
                SweepAction::EndSession { session } => {
                    self.commit_locked(
                        &mut wal,
                        &session.0,
                        WalEvent::SessionEnded {
                            reason: Some(REASON_GRACE_EXPIRED.to_string()),
                        },
                    )?;
                    report.ended.push(session);
                }
                SweepAction::CancelOperation { op, reason } => {
                    let cancellable = self
                        .read_tracker()
                        .operation(&op)
                        .map(|o| o.can_cancel())
                        .unwrap_or(false);
                    if !cancellable {
                        continue;
                    }
                    self.commit_locked(
                        &mut wal,
                        &op.0,
                        WalEvent::Cancelled {
                            reason: Some(reason),
                        },
                    )?;
                    report.cancelled.push(op);
                }
            }
        }

        if !report.is_empty() {
            tracing::info!(
                disconnected = report.disconnected.len(),
                ended = report.ended.len(),
                requeued = report.requeued.len(),
                failed = report.failed.len(),
                cancelled = report.cancelled.len(),
                "sweep reconciled liveness"
            );
        }
        Ok(report)
    }

    // === Checkpoints ===

    /// Force an out-of-schedule checkpoint
    pub fn checkpoint_now(&self) -> Result<CheckpointMeta, ManagerError> {
        let mut wal = self.lock_wal();

        // Writers are excluded, so the snapshot and its recorded sequence
        // cannot drift apart
        let state = {
            let tracker = self.read_tracker();
            CheckpointState::from_tracker(&tracker, wal.last_sequence(), self.clock.now())
        };
        let meta = self.checkpoints.publish(&state)?;

        self.commit_locked(
            &mut wal,
            &meta.id,
            WalEvent::Checkpoint {
                wal_sequence: meta.wal_sequence,
            },
        )?;

        {
            let mut meter = self.lock_meter();
            meter.ops_since = 0;
            meter.last_at = self.clock.now();
            meter.last_sequence = Some(meta.wal_sequence);
        }

        self.checkpoints.prune(self.config.checkpoint.keep)?;
        Ok(meta)
    }

    /// Take a checkpoint if the policy says one is due
    pub fn maybe_checkpoint(&self) -> Result<Option<CheckpointMeta>, ManagerError> {
        let due = {
            let meter = self.lock_meter();
            let elapsed = self
                .clock
                .now()
                .signed_duration_since(meter.last_at)
                .to_std()
                .unwrap_or_default();
            meter.ops_since > 0 && self.config.checkpoint.is_due(meter.ops_since, elapsed)
        };
        if due {
            Ok(Some(self.checkpoint_now()?))
        } else {
            Ok(None)
        }
    }

    /// Discard WAL records already covered by the newest published
    /// checkpoint. Returns the number of records removed.
    pub fn compact(&self) -> Result<u64, ManagerError> {
        let covered = self.lock_meter().last_sequence;
        let Some(up_to_sequence) = covered else {
            return Ok(0);
        };
        let mut wal = self.lock_wal();
        Ok(wal.truncate(up_to_sequence)?)
    }

    // === Internals ===

    /// Append then apply: the append is the commit point; the in-memory
    /// table is only touched after the record is durable
    fn commit_locked(
        &self,
        wal: &mut L,
        entity_id: &str,
        event: WalEvent,
    ) -> Result<u64, ManagerError> {
        let entry = wal.append(self.clock.now_micros(), entity_id, event)?;
        tracing::debug!(
            sequence = entry.sequence,
            event = entry.event.kind(),
            entity = entity_id,
            "transition committed"
        );
        {
            let mut tracker = self.write_tracker();
            tracker.apply(&entry)?;
        }
        self.lock_meter().ops_since += 1;
        Ok(entry.sequence)
    }

    /// Shared fail path: requeue while attempts remain, else terminal
    fn fail_locked(
        &self,
        wal: &mut L,
        op: &Operation,
        error: &str,
    ) -> Result<OpState, ManagerError> {
        let retry_count = op.retry_count + 1;
        if op.next_failure_requeues() {
            self.commit_locked(
                wal,
                &op.id.0,
                WalEvent::Requeued {
                    reason: error.to_string(),
                    retry_count,
                    manual: false,
                },
            )?;
            Ok(OpState::Queued)
        } else {
            self.commit_locked(
                wal,
                &op.id.0,
                WalEvent::Failed {
                    error: error.to_string(),
                    retry_count,
                },
            )?;
            Ok(OpState::Failed)
        }
    }

    fn session_state(&self, session_id: &SessionId) -> Result<SessionState, ManagerError> {
        self.read_tracker()
            .session(session_id)
            .map(|s| s.state)
            .ok_or_else(|| not_found("session", &session_id.0))
    }

    fn operation_snapshot(&self, op_id: &OperationId) -> Result<Operation, ManagerError> {
        self.read_tracker()
            .operation(op_id)
            .cloned()
            .ok_or_else(|| not_found("operation", &op_id.0))
    }

    fn lock_wal(&self) -> MutexGuard<'_, L> {
        self.wal.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_meter(&self) -> MutexGuard<'_, CheckpointMeter> {
        self.meter.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read_tracker(&self) -> RwLockReadGuard<'_, Tracker> {
        self.tracker.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_tracker(&self) -> RwLockWriteGuard<'_, Tracker> {
        self.tracker.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn not_found(kind: &'static str, id: &str) -> ManagerError {
    ManagerError::NotFound {
        kind,
        id: id.to_string(),
    }
}

fn invalid_transition(op: &Operation, action: &'static str) -> ManagerError {
    ManagerError::InvalidTransition {
        id: op.id.0.clone(),
        state: op.state.as_str(),
        action,
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
