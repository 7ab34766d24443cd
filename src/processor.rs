//! Batching layer between closed scopes and exporters.
//!
//! Completed records are buffered in completion order and delivered to every
//! registered exporter when the buffer reaches `max_batch_size`, and on
//! `force_flush`/`shutdown`. Delivery happens under the buffer lock so
//! batches reach each exporter in the order the spans closed; a step always
//! lands in the span log before the episode that contains it.

use agenttrace_core::{Error, Result, SpanRecord};
use agenttrace_export::SpanExporter;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Buffers completed spans and fans batches out to exporters
pub struct BatchSpanProcessor {
    exporters: Vec<Arc<dyn SpanExporter>>,
    buffer: Mutex<Vec<SpanRecord>>,
    max_batch_size: usize,
}

impl BatchSpanProcessor {
    /// Create a processor delivering to `exporters`.
    pub fn new(exporters: Vec<Arc<dyn SpanExporter>>, max_batch_size: usize) -> Result<Self> {
        if max_batch_size == 0 {
            return Err(Error::InvalidConfig(
                "max_batch_size must be at least 1".to_string(),
            ));
        }
        Ok(BatchSpanProcessor {
            exporters,
            buffer: Mutex::new(Vec::with_capacity(max_batch_size)),
            max_batch_size,
        })
    }

    /// Records waiting for the next delivery.
    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Number of registered exporters.
    pub fn exporter_count(&self) -> usize {
        self.exporters.len()
    }

    /// Accept one closed span, delivering the buffer if it is full.
    pub fn on_end(&self, record: SpanRecord) -> Result<()> {
        let mut buffer = self.buffer.lock();
        buffer.push(record);
        if buffer.len() < self.max_batch_size {
            return Ok(());
        }
        let batch = std::mem::take(&mut *buffer);
        self.deliver(&batch)
    }

    /// Deliver everything buffered, then flush each exporter.
    pub fn force_flush(&self, timeout: Duration) -> Result<()> {
        let delivered = {
            let mut buffer = self.buffer.lock();
            let batch = std::mem::take(&mut *buffer);
            if batch.is_empty() {
                Ok(())
            } else {
                self.deliver(&batch)
            }
        };

        let flushed = self.each_exporter(|exporter| exporter.force_flush(timeout));
        delivered.and(flushed)
    }

    /// Flush, then shut every exporter down.
    pub fn shutdown(&self, timeout: Duration) -> Result<()> {
        let flushed = self.force_flush(timeout);
        let closed = self.each_exporter(|exporter| exporter.shutdown());
        flushed.and(closed)
    }

    fn deliver(&self, batch: &[SpanRecord]) -> Result<()> {
        debug!(
            "Delivering {} spans to {} exporters",
            batch.len(),
            self.exporters.len()
        );
        self.each_exporter(|exporter| exporter.export(batch))
    }

    /// Run `op` on every exporter, returning the first error.
    ///
    /// A failing exporter never keeps the others from seeing the call.
    fn each_exporter<F>(&self, op: F) -> Result<()>
    where
        F: Fn(&dyn SpanExporter) -> Result<()>,
    {
        let mut first = None;
        for exporter in &self.exporters {
            if let Err(e) = op(exporter.as_ref()) {
                error!("Span exporter failed: {}", e);
                if first.is_none() {
                    first = Some(e);
                }
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
