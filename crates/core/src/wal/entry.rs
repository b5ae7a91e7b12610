// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WAL entry structure with checksum verification
//!
//! Each WAL entry contains a sequence number, wall-clock timestamp, the id
//! of the entity it concerns (operation or session), the event, and a CRC32
//! checksum for integrity verification.

use super::event::WalEvent;
use super::WalError;
use serde::{Deserialize, Serialize};

/// A single entry in the write-ahead log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing sequence number, starting at 1
    pub sequence: u64,
    /// Microseconds since Unix epoch
    pub timestamp_micros: u64,
    /// Operation or session id the event concerns
    pub entity_id: String,
    /// The recorded state transition
    #[serde(flatten)]
    pub event: WalEvent,
    /// CRC32 checksum of the serialized event
    pub checksum: u32,
}

impl WalEntry {
    /// Create a new WAL entry with computed checksum
    pub fn new(
        sequence: u64,
        timestamp_micros: u64,
        entity_id: &str,
        event: WalEvent,
    ) -> Self {
        let checksum = Self::calculate_checksum(&event);
        Self {
            sequence,
            timestamp_micros,
            entity_id: entity_id.to_string(),
            event,
            checksum,
        }
    }

    /// Calculate CRC32 checksum of the event
    fn calculate_checksum(event: &WalEvent) -> u32 {
        // WalEvent only contains strings, integers, and serde_json::Value,
        // all of which serialize without error
        let json = serde_json::to_string(event).unwrap_or_default();
        crc32fast::hash(json.as_bytes())
    }

    /// Verify the checksum matches the event
    pub fn verify(&self) -> bool {
        self.checksum == Self::calculate_checksum(&self.event)
    }

    /// Serialize to newline-delimited JSON (one line)
    pub fn to_line(&self) -> Result<String, WalError> {
        serde_json::to_string(self).map_err(WalError::from)
    }

    /// Parse from a single line of JSON
    pub fn from_line(line: &str) -> Result<Self, WalError> {
        serde_json::from_str(line).map_err(WalError::from)
    }
}

#[cfg(test)]
#[path = "entry_tests.rs"]
mod tests;
