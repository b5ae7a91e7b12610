//! Shared harness for behavioral specs.

use opkeep_core::{
    CheckpointStore, DurabilityConfig, FakeClock, OperationId, SequentialIdGen, SessionId,
    SessionManager, WalWriter,
};
use tempfile::TempDir;

pub type TestManager = SessionManager<WalWriter, CheckpointStore, FakeClock, SequentialIdGen>;

/// A storage root with controllable time and predictable ids that can be
/// "crashed" (dropped) and reopened.
pub struct Engine {
    pub dir: TempDir,
    pub clock: FakeClock,
    pub ids: SequentialIdGen,
    pub config: DurabilityConfig,
}

impl Engine {
    pub fn new() -> Self {
        Self::with_config(DurabilityConfig::default())
    }

    pub fn with_config(config: DurabilityConfig) -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            clock: FakeClock::new(),
            ids: SequentialIdGen::new("t"),
            config,
        }
    }

    /// Open (or recover) a manager over this root
    pub fn open(&self) -> TestManager {
        SessionManager::open_with(
            self.dir.path(),
            self.config.clone(),
            self.clock.clone(),
            self.ids.clone(),
        )
        .unwrap()
    }
}

/// Everything observable about the engine's state, as JSON, for
/// byte-for-byte recovery comparisons.
pub fn state_json(manager: &TestManager) -> serde_json::Value {
    serde_json::json!({
        "operations": manager.list_operations(),
        "sessions": manager.list_sessions(),
    })
}

/// Start a session and submit one operation of the given kind
pub fn session_with_op(manager: &TestManager, kind: &str) -> (SessionId, OperationId) {
    let session_id = manager.start_session().unwrap();
    let op_id = manager
        .submit_operation(&session_id, kind, serde_json::json!({"payload": kind}))
        .unwrap();
    (session_id, op_id)
}
