//! Exporter trait

use agenttrace_core::{Result, SpanRecord};
use std::time::Duration;

/// Receiver of completed-span batches
///
/// The batching layer calls `export` with spans in completion order, and
/// `force_flush`/`shutdown` at lifecycle points (at minimum once at process
/// end).
pub trait SpanExporter: Send + Sync {
    /// Accept one batch of completed spans.
    fn export(&self, batch: &[SpanRecord]) -> Result<()>;

    /// Persist buffered state and wait, up to `timeout`, for deferred work.
    fn force_flush(&self, timeout: Duration) -> Result<()>;

    /// Flush, then release resources. Idempotent.
    fn shutdown(&self) -> Result<()>;
}
