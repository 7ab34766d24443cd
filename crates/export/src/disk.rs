//! Disk exporter
//!
//! Persists every span to the [`SpanStore`] before returning and defers
//! episode materialization to the single background worker.
//!
//! ## Backpressure
//!
//! After each episode submission the exporter prunes finished jobs. If the
//! number still outstanding reaches `max_pending`, `export` flushes
//! synchronously before returning. This trades an occasional stall in the
//! producing thread for a hard ceiling on outstanding materializations.
//!
//! ## Failures
//!
//! A failed materialization does not block other jobs. Its error is kept
//! until the next `force_flush` or `shutdown`, which returns the first one.

use crate::exporter::SpanExporter;
use crate::worker::{JobHandle, MaterializeWorker};
use agenttrace_bundle::{EpisodeBundler, Materializer};
use agenttrace_core::{Error, Result, ScopeKind, SpanRecord};
use agenttrace_durability::{DurabilityMode, SpanStore};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Tuning for [`DiskSpanExporter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportOptions {
    /// Outstanding materializations that trigger a synchronous flush
    pub max_pending: usize,
    /// Wait bound for backpressure flushes and `shutdown`
    pub flush_timeout: Duration,
}

impl Default for ExportOptions {
    fn default() -> Self {
        ExportOptions {
            max_pending: 10,
            flush_timeout: Duration::from_secs(30),
        }
    }
}

/// Export sink writing the span log and episode bundles
pub struct DiskSpanExporter {
    store: Arc<SpanStore>,
    worker: MaterializeWorker,
    pending: Mutex<Vec<JobHandle>>,
    /// Errors collected from finished jobs, oldest first
    failures: Mutex<Vec<Error>>,
    options: ExportOptions,
    shut_down: AtomicBool,
}

impl DiskSpanExporter {
    /// Exporter for `run_dir` with the default bundle writer.
    pub fn open(run_dir: impl AsRef<Path>, mode: DurabilityMode) -> Result<Self> {
        let store = Arc::new(SpanStore::open(run_dir, mode)?);
        let bundler = Arc::new(EpisodeBundler::new(Arc::clone(&store)));
        Self::with_materializer(store, bundler, ExportOptions::default())
    }

    /// Exporter with an explicit store, materializer and options.
    pub fn with_materializer(
        store: Arc<SpanStore>,
        materializer: Arc<dyn Materializer>,
        options: ExportOptions,
    ) -> Result<Self> {
        if options.max_pending == 0 {
            return Err(Error::InvalidConfig(
                "max_pending must be at least 1".to_string(),
            ));
        }
        let worker = MaterializeWorker::spawn(materializer, options.max_pending)?;
        Ok(DiskSpanExporter {
            store,
            worker,
            pending: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            options,
            shut_down: AtomicBool::new(false),
        })
    }

    /// The span log this exporter appends to.
    pub fn store(&self) -> &Arc<SpanStore> {
        &self.store
    }

    /// Options in effect.
    pub fn options(&self) -> ExportOptions {
        self.options
    }

    /// Materializations submitted and not yet finished.
    pub fn pending(&self) -> usize {
        self.prune()
    }

    /// Drop finished handles, keeping their errors. Returns what remains.
    fn prune(&self) -> usize {
        let mut pending = self.pending.lock();
        let mut failures = self.failures.lock();
        pending.retain(|handle| {
            if !handle.is_finished() {
                return true;
            }
            if let Some(Err(e)) = handle.take_result() {
                failures.push(e);
            }
            false
        });
        pending.len()
    }

    /// Wait for every pending job, up to `timeout`, clearing the pending set.
    fn drain(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let handles = std::mem::take(&mut *self.pending.lock());

        let mut unfinished = 0;
        for handle in handles {
            if !handle.wait_until(deadline) {
                unfinished += 1;
                continue;
            }
            if let Some(Err(e)) = handle.take_result() {
                self.failures.lock().push(e);
            }
        }

        if unfinished > 0 {
            warn!(
                "Flush deadline passed with {} materializations still running",
                unfinished
            );
            return Err(Error::FlushTimeout {
                pending: unfinished,
            });
        }
        Ok(())
    }

    fn take_first_failure(&self) -> Option<Error> {
        let mut failures = std::mem::take(&mut *self.failures.lock());
        if failures.len() > 1 {
            warn!(
                "{} materializations failed; reporting the first",
                failures.len()
            );
        }
        if failures.is_empty() {
            None
        } else {
            Some(failures.remove(0))
        }
    }
}

impl SpanExporter for DiskSpanExporter {
    fn export(&self, batch: &[SpanRecord]) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(Error::Closed("disk exporter"));
        }

        self.store.append_all(batch)?;

        for record in batch.iter().filter(|r| r.is_scope(ScopeKind::Episode)) {
            let handle = self.worker.submit(record.clone())?;
            debug!("Queued materialization of episode {}", handle.episode());
            self.pending.lock().push(handle);

            let outstanding = self.prune();
            if outstanding >= self.options.max_pending {
                warn!(
                    "{} materializations pending, flushing before accepting more",
                    outstanding
                );
                self.store.flush()?;
                // Backpressure only bounds the wait; errors surface on the
                // next explicit flush.
                if let Err(e) = self.drain(self.options.flush_timeout) {
                    debug!("Backpressure flush ended early: {}", e);
                }
            }
        }
        Ok(())
    }

    fn force_flush(&self, timeout: Duration) -> Result<()> {
        self.store.flush()?;
        let waited = self.drain(timeout);
        match self.take_first_failure() {
            Some(e) => Err(e),
            None => waited,
        }
    }

    fn shutdown(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let synced = self.store.flush();
        let waited = self.drain(self.options.flush_timeout);
        self.worker.close();
        // A timed-out drain leaves jobs running; don't wait on them here.
        if waited.is_ok() {
            self.worker.join();
        }
        let closed = self.store.close();
        info!("Disk exporter for {} shut down", self.store.path().display());

        match self.take_first_failure() {
            Some(e) => Err(e),
            None => synced.and(waited).and(closed),
        }
    }
}
