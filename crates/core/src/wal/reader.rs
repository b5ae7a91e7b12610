// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WAL reader for iterating and validating entries
//!
//! The reader provides ordered iteration over WAL entries with corruption
//! detection. Replay stops at the first invalid entry (truncated write or
//! checksum mismatch) rather than aborting: the system resumes from the
//! last confirmed-good record and the discarded tail is reported.

use super::entry::WalEntry;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur when reading WAL entries
#[derive(Debug, Error)]
pub enum WalReadError {
    #[error("corrupted entry at line {line}: {reason}")]
    Corrupted { line: u64, reason: String },
    #[error("checksum mismatch at line {line}")]
    ChecksumMismatch { line: u64 },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// WAL reader for iterating over entries
pub struct WalReader {
    path: PathBuf,
}

impl WalReader {
    /// Open a WAL file for reading; a missing file reads as empty
    pub fn open_or_empty(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// Read entries with sequence strictly greater than `sequence`
    ///
    /// This is the replay primitive: `entries_after(N)` yields exactly the
    /// records with sequence > N, in commit order, stopping at the first
    /// corrupt entry.
    pub fn entries_after(&self, sequence: u64) -> Result<WalEntryIter, WalReadError> {
        WalEntryIter::new(&self.path, sequence)
    }

    /// The last valid sequence number in the log
    pub fn last_sequence(&self) -> Result<u64, WalReadError> {
        let mut last = 0;
        for entry_result in self.entries_after(0)? {
            match entry_result {
                Ok(entry) => last = entry.sequence,
                Err(_) => break,
            }
        }
        Ok(last)
    }

    /// Count the number of valid entries
    pub fn count(&self) -> Result<u64, WalReadError> {
        let mut count = 0;
        for entry_result in self.entries_after(0)? {
            if entry_result.is_ok() {
                count += 1;
            } else {
                break;
            }
        }
        Ok(count)
    }

    /// Validate the log and summarize its contents
    pub fn validate(&self) -> Result<WalValidation, WalReadError> {
        let mut valid_entries = 0u64;
        let mut last_valid_sequence = None;
        let mut corruption = None;

        for entry_result in self.entries_after(0)? {
            match entry_result {
                Ok(entry) => {
                    valid_entries += 1;
                    last_valid_sequence = Some(entry.sequence);
                }
                Err(WalReadError::Corrupted { line, reason }) => {
                    corruption = Some(WalCorruption { line, reason });
                    break;
                }
                Err(WalReadError::ChecksumMismatch { line }) => {
                    corruption = Some(WalCorruption {
                        line,
                        reason: "checksum mismatch".to_string(),
                    });
                    break;
                }
                Err(WalReadError::Io(e)) => {
                    corruption = Some(WalCorruption {
                        line: valid_entries + 1,
                        reason: format!("IO error: {}", e),
                    });
                    break;
                }
            }
        }

        Ok(WalValidation {
            valid_entries,
            last_valid_sequence,
            corruption,
        })
    }

    /// Path to the WAL file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Validation result for a WAL file
#[derive(Debug)]
pub struct WalValidation {
    pub valid_entries: u64,
    pub last_valid_sequence: Option<u64>,
    pub corruption: Option<WalCorruption>,
}

/// Information about corruption found in a WAL file
#[derive(Debug)]
pub struct WalCorruption {
    pub line: u64,
    pub reason: String,
}

/// Iterator over WAL entries with position tracking
pub struct WalEntryIter {
    reader: Option<BufReader<File>>,
    line_number: u64,
    skip_through_sequence: u64,
    /// Byte position after the last successfully validated entry
    last_valid_position: u64,
}

impl WalEntryIter {
    fn new(path: &Path, skip_through_sequence: u64) -> Result<Self, WalReadError> {
        let reader = if path.exists() {
            Some(BufReader::new(File::open(path)?))
        } else {
            None
        };

        Ok(Self {
            reader,
            line_number: 0,
            skip_through_sequence,
            last_valid_position: 0,
        })
    }

    /// Byte position after the last successfully validated entry, used to
    /// cut a corrupt tail off the file
    pub fn last_valid_position(&self) -> u64 {
        self.last_valid_position
    }
}

impl Iterator for WalEntryIter {
    type Item = Result<WalEntry, WalReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        let reader = self.reader.as_mut()?;

        loop {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) => return None, // EOF
                Ok(_) => {
                    self.line_number += 1;

                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let entry = match WalEntry::from_line(trimmed) {
                        Ok(e) => e,
                        Err(e) => {
                            return Some(Err(WalReadError::Corrupted {
                                line: self.line_number,
                                reason: e.to_string(),
                            }));
                        }
                    };

                    if !entry.verify() {
                        return Some(Err(WalReadError::ChecksumMismatch {
                            line: self.line_number,
                        }));
                    }

                    // Entry is valid; remember where it ends
                    let position = reader
                        .stream_position()
                        .unwrap_or(self.last_valid_position);
                    self.last_valid_position = position;

                    // Skip entries at or below the requested sequence
                    if entry.sequence <= self.skip_through_sequence {
                        continue;
                    }

                    return Some(Ok(entry));
                }
                Err(e) => return Some(Err(WalReadError::Io(e))),
            }
        }
    }
}

#[cfg(test)]
#[path = "reader_tests.rs"]
mod tests;
