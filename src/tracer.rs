//! Tracer entry point.
//!
//! This module provides the `Tracer`, which opens experiment, episode and
//! step scopes and owns the pipeline behind them: batching layer, disk
//! exporter, span log and materialization worker.

use crate::config::TracerConfig;
use crate::context::{self, ContextGuard, Frame, SpanContext};
use crate::processor::BatchSpanProcessor;
use crate::scope::ScopeGuard;
use agenttrace_bundle::EpisodeBundler;
use agenttrace_core::{
    new_span_id, new_trace_id, now_nanos, AttributeValue, Attributes, Result, ScopeKind,
    SpanRecord, SpanStatus, ATTR_EXPERIMENT, ATTR_NAME, ATTR_SCOPE_KIND, DEFAULT_EXPERIMENT,
};
use agenttrace_durability::{DurabilityMode, SpanStore};
use agenttrace_export::{DiskSpanExporter, ExportOptions, SpanExporter};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Default name of steps opened by [`Tracer::log`]
pub const DEFAULT_STEP_NAME: &str = "step";

static NEXT_TRACER_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) struct TracerInner {
    /// Distinguishes this tracer's frames in the thread-local stacks
    pub(crate) id: u64,
    run_id: Uuid,
    config: TracerConfig,
    processor: BatchSpanProcessor,
    shut_down: AtomicBool,
}

impl TracerInner {
    pub(crate) fn on_end(&self, record: SpanRecord) {
        if self.shut_down.load(Ordering::SeqCst) {
            debug!("Dropping span {} closed after shutdown", record.name);
            return;
        }
        if let Err(e) = self.processor.on_end(record) {
            error!("Failed to export closed span: {}", e);
        }
    }

    fn shutdown(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.processor.shutdown(self.config.flush_timeout());
        info!(run_id = %self.run_id, "Tracer shut down");
        result
    }
}

impl Drop for TracerInner {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(run_id = %self.run_id, "Tracer shutdown on drop failed: {}", e);
        }
    }
}

/// Opens scopes and exports the spans they produce
///
/// Scopes nest through a thread-local context: a scope opened while another
/// of the same tracer is open on the calling thread becomes its child, and an
/// episode inherits the experiment name of the innermost enclosing
/// experiment. Threads never see each other's open scopes unless a
/// [`SpanContext`] is carried over and [`attach`](Self::attach)ed.
///
/// `Tracer` is cheap to clone; clones share one pipeline, which shuts down
/// when [`shutdown`](Self::shutdown) is called or the last clone and guard
/// are dropped.
///
/// # Example
///
/// ```ignore
/// use agenttrace::prelude::*;
///
/// let tracer = Tracer::open("./runs")?;
/// {
///     let _exp = tracer.start_experiment("demo_experiment");
///     let _ep = tracer.start_episode("episode_0", None);
///     tracer.log([("action", AttributeValue::from("noop"))]);
/// }
/// tracer.shutdown()?;
/// ```
#[derive(Clone)]
pub struct Tracer {
    inner: Arc<TracerInner>,
}

impl Tracer {
    /// Create a tracer writing to `run_dir` with default settings.
    pub fn open(run_dir: impl AsRef<Path>) -> Result<Self> {
        Self::builder().run_dir(run_dir).build()
    }

    /// Create a tracer from a loaded configuration.
    pub fn from_config(config: TracerConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    /// Create a builder for tracer configuration.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let tracer = Tracer::builder()
    ///     .run_dir("./runs")
    ///     .service_name("rollouts")
    ///     .strict()
    ///     .build()?;
    /// ```
    pub fn builder() -> TracerBuilder {
        TracerBuilder::new()
    }

    /// Unique id of this tracer's run.
    pub fn run_id(&self) -> Uuid {
        self.inner.run_id
    }

    /// Directory holding the span log and the episode bundles.
    pub fn run_dir(&self) -> &Path {
        &self.inner.config.run_dir
    }

    /// Service name from the configuration.
    pub fn service_name(&self) -> &str {
        &self.inner.config.service_name
    }

    /// Configuration in effect.
    pub fn config(&self) -> &TracerConfig {
        &self.inner.config
    }

    /// Open an experiment scope.
    ///
    /// Episodes opened on this thread while the guard lives inherit `name`
    /// as their experiment; the name stops applying when the guard drops.
    ///
    /// `name` becomes the `{run_dir}/{name}/` directory of its episodes'
    /// bundles. See [`Tracer::start_episode`] for the names that cannot be
    /// materialized.
    pub fn start_experiment(&self, name: &str) -> ScopeGuard {
        self.open_scope(name, Some(ScopeKind::Experiment), Some(Arc::from(name)))
    }

    /// Open an episode scope.
    ///
    /// The experiment name is `experiment` if given, else the innermost open
    /// experiment on this thread, else `"default"`.
    ///
    /// When the scope closes, the episode is bundled under
    /// `{run_dir}/{experiment}/{name}/` and `{run_dir}/{experiment}/{name}.zip`.
    /// Both names are used as single directory components: a name that is
    /// empty, `.` or `..`, or contains `/`, `\` or a NUL byte fails that
    /// episode's materialization with [`crate::Error::Materialization`],
    /// reported by the next [`Tracer::force_flush`] or [`Tracer::shutdown`].
    /// Other episodes are still bundled.
    pub fn start_episode(&self, name: &str, experiment: Option<&str>) -> ScopeGuard {
        let experiment = match experiment {
            Some(e) => Arc::from(e),
            None => context::current_experiment(self.inner.id)
                .unwrap_or_else(|| Arc::from(DEFAULT_EXPERIMENT)),
        };
        self.open_scope(name, Some(ScopeKind::Episode), Some(experiment))
    }

    /// Open a step scope.
    pub fn start_step(&self, name: &str) -> ScopeGuard {
        self.open_scope(name, Some(ScopeKind::Step), None)
    }

    /// Open an untyped span for auxiliary instrumentation.
    ///
    /// Untyped spans never become bundle steps, but scopes opened inside one
    /// still descend from the enclosing episode.
    pub fn start_span(&self, name: &str) -> ScopeGuard {
        self.open_scope(name, None, None)
    }

    /// Record one step named `"step"` carrying `data` as attributes.
    ///
    /// # Example
    ///
    /// ```ignore
    /// tracer.log([
    ///     ("action", AttributeValue::from("move_left")),
    ///     ("reward", AttributeValue::from(0.5)),
    /// ]);
    /// ```
    pub fn log<K, V>(&self, data: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<AttributeValue>,
    {
        self.log_named(DEFAULT_STEP_NAME, data);
    }

    /// Record one step named `name` carrying `data` as attributes.
    pub fn log_named<K, V>(&self, name: &str, data: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<AttributeValue>,
    {
        let mut step = self.start_step(name);
        step.set_attributes(data);
    }

    /// Run `f` inside an episode scope, failing the span if `f` fails.
    pub fn in_episode<T, E, F>(&self, name: &str, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut ScopeGuard) -> std::result::Result<T, E>,
        E: fmt::Display,
    {
        let mut scope = self.start_episode(name, None);
        let result = f(&mut scope);
        if let Err(e) = &result {
            scope.record_error(e);
        }
        result
    }

    /// Run `f` inside a step scope, failing the span if `f` fails.
    pub fn in_step<T, E, F>(&self, name: &str, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut ScopeGuard) -> std::result::Result<T, E>,
        E: fmt::Display,
    {
        let mut scope = self.start_step(name);
        let result = f(&mut scope);
        if let Err(e) = &result {
            scope.record_error(e);
        }
        result
    }

    /// Experiment name an episode opened here would inherit.
    pub fn current_experiment(&self) -> Option<String> {
        context::current_experiment(self.inner.id).map(|e| e.to_string())
    }

    /// Innermost open scope on this thread, for handing to another thread.
    pub fn current_context(&self) -> Option<SpanContext> {
        let frame = context::innermost(self.inner.id)?;
        let mut ctx = SpanContext::from(frame);
        ctx.experiment = self.current_experiment();
        Some(ctx)
    }

    /// Make `ctx` the enclosing scope on this thread until the guard drops.
    pub fn attach(&self, ctx: SpanContext) -> ContextGuard {
        ContextGuard::attach(self.inner.id, ctx)
    }

    /// Deliver buffered spans and wait for pending materializations.
    ///
    /// Waits at most the configured flush timeout. A timeout is reported as
    /// `Error::FlushTimeout`; archives still in progress may not exist yet.
    pub fn force_flush(&self) -> Result<()> {
        self.inner.processor.force_flush(self.inner.config.flush_timeout())
    }

    /// Flush everything and release the span log.
    ///
    /// Idempotent. Spans closed afterwards are discarded.
    pub fn shutdown(&self) -> Result<()> {
        self.inner.shutdown()
    }

    /// Check whether [`shutdown`](Self::shutdown) has run.
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    fn open_scope(
        &self,
        name: &str,
        kind: Option<ScopeKind>,
        experiment: Option<Arc<str>>,
    ) -> ScopeGuard {
        let (trace_id, parent_span_id) = match context::innermost(self.inner.id) {
            Some(parent) => (parent.trace_id, Some(parent.span_id)),
            None => (new_trace_id(), None),
        };
        let span_id = new_span_id();

        let mut attributes = Attributes::new();
        if let Some(kind) = kind {
            attributes.insert(ATTR_SCOPE_KIND.to_string(), kind.as_str().into());
            attributes.insert(ATTR_NAME.to_string(), name.into());
        }
        if kind == Some(ScopeKind::Episode) {
            if let Some(experiment) = &experiment {
                attributes.insert(
                    ATTR_EXPERIMENT.to_string(),
                    AttributeValue::from(&**experiment),
                );
            }
        }

        context::push(Frame {
            tracer_id: self.inner.id,
            trace_id,
            span_id,
            experiment,
        });

        ScopeGuard::new(
            Arc::clone(&self.inner),
            SpanRecord {
                trace_id,
                span_id,
                parent_span_id,
                name: name.to_string(),
                attributes,
                start_time: Some(now_nanos()),
                end_time: None,
                status: SpanStatus::Unset,
            },
        )
    }
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("run_id", &self.inner.run_id)
            .field("service_name", &self.inner.config.service_name)
            .field("run_dir", &self.inner.config.run_dir)
            .finish()
    }
}

/// Builder for tracer configuration
///
/// Starts from [`TracerConfig::default`]. The disk exporter is always
/// installed; [`with_exporter`](Self::with_exporter) adds more sinks that
/// receive the same batches.
pub struct TracerBuilder {
    config: TracerConfig,
    exporters: Vec<Arc<dyn SpanExporter>>,
}

impl TracerBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        TracerBuilder {
            config: TracerConfig::default(),
            exporters: Vec::new(),
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: TracerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the service name.
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.config.service_name = name.into();
        self
    }

    /// Set the run directory.
    pub fn run_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.config.run_dir = PathBuf::from(path.as_ref());
        self
    }

    /// Set the span log durability mode.
    pub fn durability(mut self, mode: DurabilityMode) -> Self {
        self.config.durability = mode;
        self
    }

    /// fsync the span log after every append.
    pub fn strict(self) -> Self {
        self.durability(DurabilityMode::Strict)
    }

    /// fsync the span log every `batch_size` appends or `interval_ms`.
    pub fn batched(self, interval_ms: u64, batch_size: usize) -> Self {
        self.durability(DurabilityMode::Batched {
            interval_ms,
            batch_size,
        })
    }

    /// Closed spans buffered before a delivery.
    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.config.max_batch_size = size;
        self
    }

    /// Outstanding materializations that make exports flush synchronously.
    pub fn max_pending_materializations(mut self, count: usize) -> Self {
        self.config.max_pending_materializations = count;
        self
    }

    /// Wait bound for flushes and shutdown.
    pub fn flush_timeout(mut self, timeout: Duration) -> Self {
        self.config.flush_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Register an additional exporter.
    pub fn with_exporter(mut self, exporter: Arc<dyn SpanExporter>) -> Self {
        self.exporters.push(exporter);
        self
    }

    /// Validate the configuration and start the pipeline.
    pub fn build(self) -> Result<Tracer> {
        let config = self.config;
        config.validate()?;

        let store = Arc::new(SpanStore::open(&config.run_dir, config.durability)?);
        let bundler = Arc::new(EpisodeBundler::new(Arc::clone(&store)));
        let disk = DiskSpanExporter::with_materializer(
            store,
            bundler,
            ExportOptions {
                max_pending: config.max_pending_materializations,
                flush_timeout: config.flush_timeout(),
            },
        )?;

        let mut exporters: Vec<Arc<dyn SpanExporter>> = vec![Arc::new(disk)];
        exporters.extend(self.exporters);
        let processor = BatchSpanProcessor::new(exporters, config.max_batch_size)?;

        let run_id = Uuid::new_v4();
        info!(
            run_id = %run_id,
            service = %config.service_name,
            run_dir = %config.run_dir.display(),
            "Tracer started"
        );

        Ok(Tracer {
            inner: Arc::new(TracerInner {
                id: NEXT_TRACER_ID.fetch_add(1, Ordering::Relaxed),
                run_id,
                config,
                processor,
                shut_down: AtomicBool::new(false),
            }),
        })
    }
}

impl Default for TracerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
