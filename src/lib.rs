//! # agenttrace
//!
//! Span tracing for agent experiments, exported to disk.
//!
//! Applications open nested scopes (experiment ⊃ episode ⊃ step). Every
//! closed span is appended to a JSON-lines span log, and every closed
//! episode is turned into a browsable bundle in the background:
//!
//! ```text
//! {run_dir}/
//! ├── traces.jsonl
//! └── {experiment}/
//!     ├── {episode}/step_0.json ... step_N.json
//!     └── {episode}.zip
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use agenttrace::prelude::*;
//!
//! let tracer = Tracer::open("./runs")?;
//!
//! {
//!     let _exp = tracer.start_experiment("demo_experiment");
//!     for e in 0..3 {
//!         let _ep = tracer.start_episode(&format!("episode_{}", e), None);
//!         for i in 0..5 {
//!             tracer.log([
//!                 ("action", AttributeValue::from(format!("action_{}", i))),
//!                 ("reward", AttributeValue::from(i as f64 * 0.1)),
//!             ]);
//!         }
//!     }
//! }
//!
//! // Drains buffered spans and waits for the bundles
//! tracer.shutdown()?;
//! ```
//!
//! ## Layers
//!
//! - [`Tracer`] / [`ScopeGuard`]: scope API and thread-scoped context
//! - [`BatchSpanProcessor`]: buffers closed spans for the exporters
//! - [`DiskSpanExporter`]: span log plus background materialization
//! - [`EpisodeArchiveReader`]: reads a finished bundle back

#![warn(missing_docs)]

mod config;
mod context;
mod processor;
mod scope;
mod tracer;

pub mod prelude;

// Main entry points
pub use config::{TracerConfig, DEFAULT_RUN_DIR, DEFAULT_SERVICE_NAME};
pub use context::{ContextGuard, SpanContext};
pub use processor::BatchSpanProcessor;
pub use scope::ScopeGuard;
pub use tracer::{Tracer, TracerBuilder, DEFAULT_STEP_NAME};

// Re-export the pipeline crates' public surface
pub use agenttrace_bundle::{EpisodeArchiveReader, EpisodeBundle, EpisodeBundler, Materializer};
pub use agenttrace_core::{
    AttributeValue, Attributes, Error, Result, ScopeKind, SpanId, SpanRecord, SpanStatus,
    Timestamp, TraceId, ATTR_EXPERIMENT, ATTR_NAME, ATTR_SCOPE_KIND, DEFAULT_EXPERIMENT,
    ERROR_MESSAGE,
};
pub use agenttrace_durability::{DurabilityMode, SpanStore, TRACES_FILE};
pub use agenttrace_export::{DiskSpanExporter, ExportOptions, SpanExporter};
