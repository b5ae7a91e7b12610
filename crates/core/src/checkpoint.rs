// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Checkpoint management for bounded recovery
//!
//! A checkpoint is an atomic full-state snapshot paired with the WAL
//! sequence it reflects. Recovery loads the newest valid checkpoint and
//! replays only the WAL tail past its sequence. Checkpoints are published
//! via write-to-temp + atomic rename so a partially-written file is never
//! observable, and a checkpoint that fails integrity checks at load time is
//! skipped in favor of the next older one.

use crate::operation::Operation;
use crate::session::Session;
use crate::tracker::Tracker;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during checkpoint operations
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("checkpoint not found: {0}")]
    NotFound(String),
    #[error("invalid checkpoint {id}: {reason}")]
    Invalid { id: String, reason: String },
}

/// Full-state snapshot as serialized to disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub version: u32,
    /// Highest WAL sequence durable at snapshot time
    pub wal_sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub operations: Vec<Operation>,
    pub sessions: Vec<Session>,
}

impl CheckpointState {
    /// Current version of the checkpoint format
    pub const CURRENT_VERSION: u32 = 1;

    /// Capture the tracker's tables, sorted by id for stable bytes
    pub fn from_tracker(tracker: &Tracker, wal_sequence: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            wal_sequence,
            timestamp,
            operations: tracker.operations().into_iter().cloned().collect(),
            sessions: tracker.sessions().into_iter().cloned().collect(),
        }
    }

    /// Rebuild a tracker from the snapshot
    pub fn to_tracker(&self) -> Tracker {
        let mut tracker = Tracker::new();
        for op in &self.operations {
            tracker.operations.insert(op.id.clone(), op.clone());
        }
        for session in &self.sessions {
            tracker.sessions.insert(session.id.clone(), session.clone());
        }
        tracker
    }

    fn checksum(&self) -> Result<u32, CheckpointError> {
        let body = serde_json::to_string(self)?;
        Ok(crc32fast::hash(body.as_bytes()))
    }
}

/// On-disk envelope pairing the state with its integrity checksum
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    checksum: u32,
    state: CheckpointState,
}

/// Checkpoint metadata, cheap to list without parsing full snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub id: String,
    pub wal_sequence: u64,
    pub size_bytes: u64,
}

/// When to take an automatic checkpoint: whichever comes first of a
/// wall-clock interval or a count of WAL records since the last one
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointPolicy {
    /// Checkpoint after this many WAL records
    pub every_ops: u64,
    /// Checkpoint after this much time
    #[serde(with = "humantime_serde")]
    pub every: Duration,
    /// Old checkpoints to keep after pruning
    pub keep: usize,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            every_ops: 100,
            every: Duration::from_secs(300),
            keep: 10,
        }
    }
}

impl CheckpointPolicy {
    /// Whether an automatic checkpoint is due
    pub fn is_due(&self, ops_since: u64, elapsed: Duration) -> bool {
        ops_since >= self.every_ops || elapsed >= self.every
    }
}

/// An atomic snapshot store
///
/// The file-backed [`CheckpointStore`] is the default implementation; the
/// trait keeps the backing storage swappable without touching tracker or
/// manager logic.
pub trait SnapshotStore: Send + Sync {
    /// Atomically publish a checkpoint; it is never observable
    /// half-written
    fn publish(&self, state: &CheckpointState) -> Result<CheckpointMeta, CheckpointError>;

    /// Load the newest valid checkpoint, skipping any that fail integrity
    /// checks in favor of the next older one
    fn load_latest(&self) -> Result<Option<(CheckpointMeta, CheckpointState)>, CheckpointError>;

    /// Remove old checkpoints, keeping the newest `keep`
    fn prune(&self, keep: usize) -> Result<Vec<String>, CheckpointError>;
}

/// Manages checkpoint publication, discovery, and pruning
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Create a store rooted at the given directory
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn ensure_dir(&self) -> Result<(), CheckpointError> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Generate a checkpoint id from sequence number and timestamp
    pub fn generate_id(wal_sequence: u64, timestamp: DateTime<Utc>) -> String {
        format!("{:08}-{}", wal_sequence, timestamp.format("%Y%m%d%H%M%S"))
    }

    /// Atomically publish a checkpoint
    ///
    /// Serialized to a temp file, fsync'd, then renamed into place; the
    /// checkpoint is never observable half-written.
    pub fn publish(&self, state: &CheckpointState) -> Result<CheckpointMeta, CheckpointError> {
        self.ensure_dir()?;

        let id = Self::generate_id(state.wal_sequence, state.timestamp);
        let envelope = CheckpointFile {
            checksum: state.checksum()?,
            state: state.clone(),
        };

        let path = self.checkpoint_path(&id);
        let temp_path = path.with_extension("json.tmp");
        {
            let mut file = File::create(&temp_path)?;
            serde_json::to_writer(&mut file, &envelope)?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &path)?;

        let size_bytes = fs::metadata(&path)?.len();

        tracing::info!(id = %id, wal_sequence = state.wal_sequence, "checkpoint published");

        Ok(CheckpointMeta {
            id,
            wal_sequence: state.wal_sequence,
            size_bytes,
        })
    }

    /// Load a checkpoint by id, verifying version and checksum
    pub fn load(&self, id: &str) -> Result<CheckpointState, CheckpointError> {
        let path = self.checkpoint_path(id);
        if !path.exists() {
            return Err(CheckpointError::NotFound(id.to_string()));
        }

        let file = File::open(&path)?;
        let envelope: CheckpointFile = serde_json::from_reader(BufReader::new(file))?;

        if envelope.state.version != CheckpointState::CURRENT_VERSION {
            return Err(CheckpointError::Invalid {
                id: id.to_string(),
                reason: format!(
                    "unsupported version {} (expected {})",
                    envelope.state.version,
                    CheckpointState::CURRENT_VERSION
                ),
            });
        }

        if envelope.state.checksum()? != envelope.checksum {
            return Err(CheckpointError::Invalid {
                id: id.to_string(),
                reason: "checksum mismatch".to_string(),
            });
        }

        Ok(envelope.state)
    }

    /// List available checkpoints, newest (highest sequence) first
    pub fn list(&self) -> Result<Vec<CheckpointMeta>, CheckpointError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut checkpoints = Vec::new();
        for dir_entry in fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    if let Some((seq_str, _)) = stem.split_once('-') {
                        if let Ok(wal_sequence) = seq_str.parse::<u64>() {
                            checkpoints.push(CheckpointMeta {
                                id: stem.to_string(),
                                wal_sequence,
                                size_bytes: fs::metadata(&path)?.len(),
                            });
                        }
                    }
                }
            }
        }

        checkpoints.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(checkpoints)
    }

    /// Load the newest valid checkpoint
    ///
    /// A checkpoint that fails parsing or integrity checks is reported and
    /// skipped; recovery falls back to the next older one rather than
    /// guessing at the discarded state.
    pub fn load_latest(&self) -> Result<Option<(CheckpointMeta, CheckpointState)>, CheckpointError> {
        for meta in self.list()? {
            match self.load(&meta.id) {
                Ok(state) => return Ok(Some((meta, state))),
                Err(e) => {
                    tracing::warn!(id = %meta.id, error = %e, "skipping stale checkpoint");
                }
            }
        }
        Ok(None)
    }

    /// Delete a checkpoint by id
    pub fn delete(&self, id: &str) -> Result<(), CheckpointError> {
        let path = self.checkpoint_path(id);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// Remove old checkpoints, keeping the newest `keep`
    pub fn prune(&self, keep: usize) -> Result<Vec<String>, CheckpointError> {
        let checkpoints = self.list()?;
        let mut deleted = Vec::new();
        for meta in checkpoints.iter().skip(keep) {
            self.delete(&meta.id)?;
            deleted.push(meta.id.clone());
        }
        Ok(deleted)
    }

    fn checkpoint_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }
}

impl SnapshotStore for CheckpointStore {
    fn publish(&self, state: &CheckpointState) -> Result<CheckpointMeta, CheckpointError> {
        CheckpointStore::publish(self, state)
    }

    fn load_latest(&self) -> Result<Option<(CheckpointMeta, CheckpointState)>, CheckpointError> {
        CheckpointStore::load_latest(self)
    }

    fn prune(&self, keep: usize) -> Result<Vec<String>, CheckpointError> {
        CheckpointStore::prune(self, keep)
    }
}

#[cfg(test)]
#[path = "checkpoint_tests.rs"]
mod tests;
