//! Tracer configuration.
//!
//! Every field has a default, so a TOML file only needs the keys it
//! changes:
//!
//! ```toml
//! service_name = "rollouts"
//! run_dir = "./runs/nightly"
//! max_pending_materializations = 4
//!
//! [durability.batched]
//! interval_ms = 50
//! batch_size = 200
//! ```

use agenttrace_core::{Error, Result};
use agenttrace_durability::DurabilityMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default service name reported by the tracer
pub const DEFAULT_SERVICE_NAME: &str = "agenttrace";

/// Default run directory, relative to the working directory
pub const DEFAULT_RUN_DIR: &str = "agenttrace-runs";

/// Settings for a [`Tracer`](crate::Tracer)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// Service name reported in logs
    pub service_name: String,
    /// Directory holding `traces.jsonl` and the episode bundles
    pub run_dir: PathBuf,
    /// Sync policy of the span log
    pub durability: DurabilityMode,
    /// Closed spans buffered before a delivery to the exporters
    pub max_batch_size: usize,
    /// Outstanding materializations that make `export` flush synchronously
    pub max_pending_materializations: usize,
    /// Wait bound for backpressure flushes, `force_flush` and `shutdown`
    pub flush_timeout_ms: u64,
}

impl Default for TracerConfig {
    fn default() -> Self {
        TracerConfig {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            run_dir: PathBuf::from(DEFAULT_RUN_DIR),
            durability: DurabilityMode::default(),
            max_batch_size: 512,
            max_pending_materializations: 10,
            flush_timeout_ms: 30_000,
        }
    }
}

impl TracerConfig {
    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: TracerConfig =
            toml::from_str(s).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Reject settings the tracer cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.run_dir.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("run_dir must not be empty".to_string()));
        }
        if self.max_batch_size == 0 {
            return Err(Error::InvalidConfig(
                "max_batch_size must be at least 1".to_string(),
            ));
        }
        if self.max_pending_materializations == 0 {
            return Err(Error::InvalidConfig(
                "max_pending_materializations must be at least 1".to_string(),
            ));
        }
        self.durability.validate()
    }

    /// `flush_timeout_ms` as a `Duration`.
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}
