//! Durability layer for agenttrace
//!
//! This crate persists completed spans:
//! - SpanStore: append-only JSON-lines span log with full-scan readback
//! - DurabilityMode: when appended lines are fsynced (Strict, Batched)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod mode;
pub mod store;

pub use mode::DurabilityMode;
pub use store::{SpanStore, TRACES_FILE};
