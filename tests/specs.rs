//! Behavioral specifications for the opkeep durability engine.
//!
//! These tests are black-box: they drive the public SessionManager API
//! against a real storage root and verify what survives crashes, sweeps,
//! and compaction. See tests/specs/prelude.rs for the shared harness.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

#[path = "specs/prelude.rs"]
mod prelude;

#[path = "specs/recovery.rs"]
mod recovery;

#[path = "specs/lifecycle.rs"]
mod lifecycle;

#[path = "specs/heartbeat.rs"]
mod heartbeat;

#[path = "specs/checkpoint.rs"]
mod checkpoint;
