// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clock abstraction for testable time handling
//!
//! All persisted timestamps are wall-clock (`DateTime<Utc>`) so that state
//! reconstructed after a restart is comparable with state recorded before it.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A clock that provides the current wall-clock time
pub trait Clock: Clone + Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Current time as microseconds since the Unix epoch
    fn now_micros(&self) -> u64 {
        self.now().timestamp_micros().max(0) as u64
    }
}

/// Real system clock
#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fake clock for testing with controllable time
#[derive(Clone)]
pub struct FakeClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl FakeClock {
    /// Starts at the current wall-clock time, truncated to microseconds so
    /// it round-trips exactly through persisted timestamps
    pub fn new() -> Self {
        let now = DateTime::from_timestamp_micros(Utc::now().timestamp_micros())
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self {
            current: Arc::new(Mutex::new(now)),
        }
    }

    /// Create a fake clock pinned to a specific instant
    pub fn at(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Advance the clock by the given duration
    pub fn advance(&self, duration: Duration) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current += ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::zero());
    }

    /// Set the clock to a specific instant
    pub fn set(&self, instant: DateTime<Utc>) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current = instant;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
