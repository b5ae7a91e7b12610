// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session state machine
//!
//! A session is the logical caller context that owns a set of operations.
//! Liveness is tracked through heartbeats: a session whose heartbeat goes
//! stale is marked `disconnected`, and one that stays disconnected past the
//! grace period is `ended`, cancelling whatever it still owned.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        SessionId(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        SessionId(s.to_string())
    }
}

/// The state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Heartbeats arriving within the disconnect timeout
    Active,
    /// Heartbeat went stale; may still resume within the grace period
    Disconnected,
    /// Ended explicitly or by grace-period expiry; final
    Ended,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::Disconnected => "disconnected",
            SessionState::Ended => "ended",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A logical caller context subject to liveness tracking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disconnected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<String>,
    /// How many times the session lost its connection
    #[serde(default)]
    pub connection_drops: u32,
    /// How many times the session came back after a disconnect
    #[serde(default)]
    pub resumes: u32,
    /// WAL sequence of the most recent checkpoint covering this session's
    /// state; 0 until one is published
    #[serde(default)]
    pub last_checkpoint_sequence: u64,
}

impl Session {
    /// Create a new session in the Active state
    pub fn new(id: impl Into<SessionId>, started_at: DateTime<Utc>) -> Self {
        Session {
            id: id.into(),
            state: SessionState::Active,
            started_at,
            last_heartbeat_at: started_at,
            disconnected_at: None,
            ended_at: None,
            end_reason: None,
            connection_drops: 0,
            resumes: 0,
            last_checkpoint_sequence: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn is_disconnected(&self) -> bool {
        self.state == SessionState::Disconnected
    }

    pub fn is_ended(&self) -> bool {
        self.state == SessionState::Ended
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
