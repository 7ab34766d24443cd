//! Core types for agenttrace
//!
//! This crate defines the record format shared by every layer:
//! - [`SpanRecord`]: one completed span, as persisted in the span log
//! - [`ScopeKind`]: experiment / episode / step tagging
//! - [`Error`]: the error type used across the workspace

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod record;
pub mod scope;

pub use error::{Error, Result};
pub use record::{
    new_span_id, new_trace_id, now_nanos, AttributeValue, Attributes, SpanId, SpanRecord,
    SpanStatus, Timestamp, TraceId,
};
pub use scope::{
    ScopeKind, ATTR_EXPERIMENT, ATTR_NAME, ATTR_SCOPE_KIND, DEFAULT_EXPERIMENT, ERROR_MESSAGE,
};
