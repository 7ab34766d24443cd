//! RAII scope handles.

use crate::context;
use crate::tracer::TracerInner;
use agenttrace_core::{
    now_nanos, AttributeValue, ScopeKind, SpanId, SpanRecord, SpanStatus, TraceId, ATTR_EXPERIMENT,
    ATTR_NAME, ATTR_SCOPE_KIND, ERROR_MESSAGE,
};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread;
use tracing::warn;

/// An open span
///
/// Dropping the guard closes the span on every exit path, including early
/// returns and unwinding, and hands the finished record to the batching
/// layer. The final status is:
///
/// - `ERROR` if the guard is dropped while the thread is panicking, or after
///   [`record_error`](Self::record_error)
/// - whatever [`set_status`](Self::set_status) last chose
/// - `OK` otherwise
///
/// Guards are tied to the thread that opened them (the scope is registered in
/// that thread's context stack), so they are neither `Send` nor `Sync`.
#[must_use = "the scope closes as soon as the guard is dropped"]
pub struct ScopeGuard {
    tracer: Arc<TracerInner>,
    trace_id: TraceId,
    span_id: SpanId,
    record: Option<SpanRecord>,
    _not_send: PhantomData<*const ()>,
}

impl ScopeGuard {
    pub(crate) fn new(tracer: Arc<TracerInner>, record: SpanRecord) -> Self {
        ScopeGuard {
            tracer,
            trace_id: record.trace_id,
            span_id: record.span_id,
            record: Some(record),
            _not_send: PhantomData,
        }
    }

    /// Trace this span belongs to.
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// Id of this span.
    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    /// Parent span, if the scope was opened inside another.
    pub fn parent_span_id(&self) -> Option<SpanId> {
        self.record.as_ref().and_then(|r| r.parent_span_id)
    }

    /// Scope kind tag, `None` for auxiliary spans.
    pub fn kind(&self) -> Option<ScopeKind> {
        self.record.as_ref().and_then(SpanRecord::scope_kind)
    }

    /// Attach one attribute. Reserved scope keys cannot be overwritten, and
    /// NaN or infinite floats are stored as [`AttributeValue::Null`].
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        let key = key.into();
        if is_reserved(&key) {
            warn!("Ignoring attempt to overwrite reserved attribute {}", key);
            return;
        }
        let value = match value.into() {
            AttributeValue::Float(f) if !f.is_finite() => AttributeValue::Null,
            value => value,
        };
        if let Some(record) = self.record.as_mut() {
            record.attributes.insert(key, value);
        }
    }

    /// Attach every entry of `data`.
    pub fn set_attributes<K, V>(&mut self, data: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<AttributeValue>,
    {
        for (key, value) in data {
            self.set_attribute(key, value);
        }
    }

    /// Choose the status reported when the scope closes.
    pub fn set_status(&mut self, status: SpanStatus) {
        if let Some(record) = self.record.as_mut() {
            record.status = status;
        }
    }

    /// Mark the scope failed and keep the error message.
    pub fn record_error(&mut self, error: impl fmt::Display) {
        if let Some(record) = self.record.as_mut() {
            record.status = SpanStatus::Error;
            record.attributes.insert(
                ERROR_MESSAGE.to_string(),
                AttributeValue::String(error.to_string()),
            );
        }
    }

    /// Close the scope now.
    pub fn end(self) {}

    fn finish(&mut self) {
        let Some(mut record) = self.record.take() else {
            return;
        };
        context::remove(self.tracer.id, self.span_id);

        let now = now_nanos();
        record.end_time = Some(record.start_time.map_or(now, |start| now.max(start)));
        if thread::panicking() {
            record.status = SpanStatus::Error;
            record
                .attributes
                .entry(ERROR_MESSAGE.to_string())
                .or_insert_with(|| AttributeValue::from("panicked"));
        } else if record.status == SpanStatus::Unset {
            record.status = SpanStatus::Ok;
        }

        self.tracer.on_end(record);
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.finish();
    }
}

impl fmt::Debug for ScopeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeGuard")
            .field("trace_id", &self.trace_id)
            .field("span_id", &self.span_id)
            .field("kind", &self.kind())
            .finish()
    }
}

fn is_reserved(key: &str) -> bool {
    key == ATTR_SCOPE_KIND || key == ATTR_NAME || key == ATTR_EXPERIMENT
}
