//! Export sink for agenttrace
//!
//! The batching layer hands completed spans to a [`SpanExporter`].
//! [`DiskSpanExporter`] persists every span synchronously and queues one
//! materialization job per episode span on a single background worker:
//!
//! ```text
//! export(batch):
//!   ┌──────────────────────┐
//!   │ SpanStore.append_all │  durability first
//!   └──────────┬───────────┘
//!   ┌──────────▼───────────┐
//!   │ submit episode jobs  │  bounded queue, one consumer
//!   └──────────┬───────────┘
//!   ┌──────────▼───────────┐
//!   │ prune finished jobs  │
//!   └──────────┬───────────┘
//!   ┌──────────▼───────────┐
//!   │ pending >= threshold │──► force flush (blocks)
//!   └──────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod disk;
mod exporter;
mod worker;

pub use disk::{DiskSpanExporter, ExportOptions};
pub use exporter::SpanExporter;
pub use worker::{JobHandle, MaterializeWorker};
