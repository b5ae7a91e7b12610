// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WAL writer for durable append operations
//!
//! The writer provides append-only operations with fsync to ensure writes
//! are persisted before returning. The append is the commit point for every
//! state transition in the system: nothing is applied in memory until the
//! corresponding entry is durable here.

use super::entry::WalEntry;
use super::event::WalEvent;
use super::reader::WalReader;
use super::{DurableLog, WalError};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// WAL writer for durable append operations
pub struct WalWriter {
    path: PathBuf,
    file: File,
    next_sequence: u64,
    bytes_written: u64,
}

impl WalWriter {
    /// Open or create a WAL file
    ///
    /// If the file exists, scans to find the next sequence number. The scan
    /// stops at the first corrupt line; if a corrupt tail is found it is cut
    /// off so that subsequent appends land after the last valid entry.
    pub fn open(path: &Path) -> Result<Self, WalError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut last_sequence = 0;
        if path.exists() {
            let reader = WalReader::open_or_empty(path);
            let mut iter = reader.entries_after(0)?;
            let mut corrupt = false;
            for entry_result in iter.by_ref() {
                match entry_result {
                    Ok(entry) => last_sequence = entry.sequence,
                    Err(e) => {
                        tracing::warn!(?e, "durability failure: discarding corrupt WAL tail");
                        corrupt = true;
                        break;
                    }
                }
            }
            if corrupt {
                Self::truncate_file(path, iter.last_valid_position())?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            next_sequence: last_sequence + 1,
            bytes_written: 0,
        })
    }

    /// Append an event to the WAL
    ///
    /// Assigns the next sequence number and returns the committed entry.
    /// The entry is durably persisted (fsync'd) before this method returns.
    /// On a write failure the partial line is cut back off so no partial
    /// record is ever visible to a reader.
    pub fn append(
        &mut self,
        timestamp_micros: u64,
        entity_id: &str,
        event: WalEvent,
    ) -> Result<WalEntry, WalError> {
        let entry = WalEntry::new(self.next_sequence, timestamp_micros, entity_id, event);
        let line = entry.to_line()?;

        let len_before = self.file.metadata()?.len();

        let commit = (|| -> Result<(), WalError> {
            self.file.write_all(line.as_bytes())?;
            self.file.write_all(b"\n")?;
            self.file.sync_all()?;
            Ok(())
        })();

        if let Err(e) = commit {
            // Roll the file back so the half-written line never surfaces
            let _ = self.file.set_len(len_before);
            let _ = self.file.sync_all();
            return Err(e);
        }

        self.next_sequence += 1;
        self.bytes_written += line.len() as u64 + 1;
        Ok(entry)
    }

    /// Discard entries with sequence <= `up_to_sequence`
    ///
    /// Only legal once a checkpoint covering `up_to_sequence` has been
    /// durably published. Retained entries are rewritten to a temporary
    /// file, fsync'd, and swapped in with an atomic rename, preserving
    /// their original sequence numbers.
    pub fn truncate(&mut self, up_to_sequence: u64) -> Result<u64, WalError> {
        let reader = WalReader::open_or_empty(&self.path);
        let mut kept = Vec::new();
        let mut removed = 0u64;
        for entry_result in reader.entries_after(0)? {
            match entry_result {
                Ok(entry) if entry.sequence <= up_to_sequence => removed += 1,
                Ok(entry) => kept.push(entry),
                // Corrupt tails are already handled at open/replay time
                Err(_) => break,
            }
        }

        let temp_path = self.path.with_extension("wal.tmp");
        {
            let mut file = File::create(&temp_path)?;
            for entry in &kept {
                let line = entry.to_line()?;
                file.write_all(line.as_bytes())?;
                file.write_all(b"\n")?;
            }
            file.sync_all()?;
        }
        std::fs::rename(&temp_path, &self.path)?;

        // Reopen the handle against the new file
        self.file = OpenOptions::new().append(true).open(&self.path)?;

        tracing::info!(up_to_sequence, removed, kept = kept.len(), "WAL truncated");
        Ok(removed)
    }

    /// Force sync to disk
    ///
    /// This happens automatically on each append, but can be called
    /// manually if needed.
    pub fn sync(&mut self) -> Result<(), WalError> {
        self.file.sync_all()?;
        Ok(())
    }

    /// The next sequence number to be assigned
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// The last assigned sequence number, or 0 if nothing was ever written
    pub fn last_sequence(&self) -> u64 {
        self.next_sequence - 1
    }

    /// Bytes written since open
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Path to the WAL file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn truncate_file(path: &Path, position: u64) -> Result<(), WalError> {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(position)?;
        file.sync_all()?;
        Ok(())
    }
}

impl DurableLog for WalWriter {
    fn append(
        &mut self,
        timestamp_micros: u64,
        entity_id: &str,
        event: WalEvent,
    ) -> Result<WalEntry, WalError> {
        WalWriter::append(self, timestamp_micros, entity_id, event)
    }

    fn replay_after(&self, sequence: u64) -> Result<Vec<WalEntry>, WalError> {
        let reader = WalReader::open_or_empty(&self.path);
        let mut entries = Vec::new();
        for entry_result in reader.entries_after(sequence)? {
            match entry_result {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "durability failure: WAL tail corrupt, replay stopped at last valid record"
                    );
                    break;
                }
            }
        }
        Ok(entries)
    }

    fn truncate(&mut self, up_to_sequence: u64) -> Result<u64, WalError> {
        WalWriter::truncate(self, up_to_sequence)
    }

    fn last_sequence(&self) -> u64 {
        WalWriter::last_sequence(self)
    }
}

#[cfg(test)]
#[path = "writer_tests.rs"]
mod tests;
