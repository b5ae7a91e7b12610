// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine configuration
//!
//! All knobs have working defaults; a TOML file can override any subset:
//!
//! ```toml
//! default_max_retries = 3
//!
//! [heartbeat]
//! disconnect_timeout = "2m"
//! grace_period = "10m"
//!
//! [checkpoint]
//! every_ops = 100
//! every = "5m"
//! ```

use crate::checkpoint::CheckpointPolicy;
use crate::heartbeat::HeartbeatConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration for a durability engine instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DurabilityConfig {
    /// Retry budget for operations submitted without an explicit one
    pub default_max_retries: u32,
    pub heartbeat: HeartbeatConfig,
    pub checkpoint: CheckpointPolicy,
}

impl Default for DurabilityConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            heartbeat: HeartbeatConfig::default(),
            checkpoint: CheckpointPolicy::default(),
        }
    }
}

impl DurabilityConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
