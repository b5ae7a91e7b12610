// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable, strictly-ordered write-ahead log
//!
//! Every state transition is appended here before it becomes visible
//! anywhere else. Sequence numbers are strictly increasing with no gaps;
//! `entries_after(N)` returns exactly the records with sequence > N, in
//! commit order. Recovery replays the tail past the last checkpoint.

pub mod entry;
pub mod event;
pub mod reader;
pub mod writer;

pub use entry::WalEntry;
pub use event::WalEvent;
pub use reader::{WalCorruption, WalReadError, WalReader, WalValidation};
pub use writer::WalWriter;

use thiserror::Error;

/// Errors from WAL append and encoding
#[derive(Debug, Error)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("read error: {0}")]
    Read(#[from] WalReadError),
}

/// A durable, strictly-ordered event log
///
/// The file-backed [`WalWriter`] is the default implementation; the trait
/// keeps the backing storage swappable without touching tracker or manager
/// logic.
pub trait DurableLog: Send {
    /// Append an event, returning the committed entry
    ///
    /// Must not return until the record is durable. On failure no partial
    /// record may be visible to any reader.
    fn append(
        &mut self,
        timestamp_micros: u64,
        entity_id: &str,
        event: WalEvent,
    ) -> Result<WalEntry, WalError>;

    /// All valid entries with sequence strictly greater than `sequence`,
    /// in commit order
    ///
    /// A corrupt tail is reported and excluded, never partially returned.
    fn replay_after(&self, sequence: u64) -> Result<Vec<WalEntry>, WalError>;

    /// Discard entries with sequence <= `up_to_sequence`
    ///
    /// Only called once a checkpoint covering that sequence has been
    /// durably published. Returns the number of entries removed.
    fn truncate(&mut self, up_to_sequence: u64) -> Result<u64, WalError>;

    /// The last committed sequence, or 0 if the log is empty
    fn last_sequence(&self) -> u64;
}
