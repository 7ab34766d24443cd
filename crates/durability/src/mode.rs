//! Durability mode for span log appends.
//!
//! Defines when appended span lines are fsynced to disk.

use agenttrace_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Durability mode for span log writes.
///
/// The span log is the single source of truth for materialization, so
/// there is no mode that skips it.
///
/// | Mode | fsync | Data Loss Window |
/// |------|-------|------------------|
/// | Batched | every N appends or T ms | bounded |
/// | Strict | every append | zero |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurabilityMode {
    /// fsync after every append.
    Strict,

    /// fsync every N appends OR every T milliseconds.
    ///
    /// Lines are buffered in process between syncs. A crash may lose up to
    /// `batch_size` spans or `interval_ms` worth of spans.
    Batched {
        /// Maximum time between fsyncs in milliseconds
        interval_ms: u64,
        /// Maximum appends between fsyncs
        batch_size: usize,
    },
}

impl DurabilityMode {
    /// Check if this mode requires fsync on every append.
    pub fn requires_immediate_fsync(&self) -> bool {
        matches!(self, DurabilityMode::Strict)
    }

    /// Human-readable description of the mode.
    pub fn description(&self) -> &'static str {
        match self {
            DurabilityMode::Strict => "Sync fsync (safest, slowest)",
            DurabilityMode::Batched { .. } => "Batched fsync (balanced speed/safety)",
        }
    }

    /// Reject settings the span store cannot honor.
    pub fn validate(&self) -> Result<()> {
        match self {
            DurabilityMode::Batched { batch_size: 0, .. } => Err(Error::InvalidConfig(
                "batched durability needs batch_size > 0".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

impl Default for DurabilityMode {
    fn default() -> Self {
        // Default: batched with 100ms interval or 1000 appends
        DurabilityMode::Batched {
            interval_ms: 100,
            batch_size: 1000,
        }
    }
}
