// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timer-driven maintenance loop
//!
//! The engine owns its own liveness and checkpoint cadence rather than
//! depending on an external scheduler. The supervisor runs two independent
//! timers: the heartbeat sweep, and the checkpoint trigger (which also
//! compacts the WAL once a checkpoint covers it). Both paths go through
//! the manager's ordinary serialized mutation API.

use crate::checkpoint::SnapshotStore;
use crate::clock::Clock;
use crate::id::IdGen;
use crate::manager::SessionManager;
use crate::wal::DurableLog;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Handle to the background maintenance task
pub struct Supervisor {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Supervisor {
    /// Spawn the maintenance loop for a manager
    pub fn spawn<L, S, C, G>(manager: Arc<SessionManager<L, S, C, G>>) -> Self
    where
        L: DurableLog + 'static,
        S: SnapshotStore + 'static,
        C: Clock + 'static,
        G: IdGen + 'static,
    {
        let (shutdown, mut rx) = watch::channel(false);
        let sweep_every = manager.config().heartbeat.sweep_interval;
        // Poll the checkpoint policy on the sweep cadence so the op-count
        // trigger fires promptly; the policy itself decides when one is due
        let checkpoint_every = manager.config().heartbeat.sweep_interval;

        let handle = tokio::spawn(async move {
            let mut sweep_tick = tokio::time::interval(sweep_every);
            let mut checkpoint_tick = tokio::time::interval(checkpoint_every);
            sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            checkpoint_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = sweep_tick.tick() => {
                        if let Err(e) = manager.sweep() {
                            tracing::warn!(error = %e, "liveness sweep failed");
                        }
                    }
                    _ = checkpoint_tick.tick() => {
                        match manager.maybe_checkpoint() {
                            Ok(Some(meta)) => {
                                if let Err(e) = manager.compact() {
                                    tracing::warn!(error = %e, checkpoint = %meta.id, "WAL compaction failed");
                                }
                            }
                            Ok(None) => {}
                            Err(e) => {
                                tracing::warn!(error = %e, "automatic checkpoint failed");
                            }
                        }
                    }
                    _ = rx.changed() => break,
                }
            }
        });

        Self { shutdown, handle }
    }

    /// Stop the loop and wait for it to finish; idempotent
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
