//! Thread-scoped scope context
//!
//! Each thread keeps a stack of the scopes it has open. A new scope takes its
//! parent, and an episode its inherited experiment name, from the innermost
//! frame belonging to the same tracer. Nothing here is shared between
//! threads; work moved to another thread carries its context explicitly with
//! [`SpanContext`] and [`Tracer::attach`](crate::Tracer::attach).

use agenttrace_core::{SpanId, TraceId};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

thread_local! {
    static STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

#[derive(Debug, Clone)]
pub(crate) struct Frame {
    pub(crate) tracer_id: u64,
    pub(crate) trace_id: TraceId,
    pub(crate) span_id: SpanId,
    /// Set on experiment and episode frames
    pub(crate) experiment: Option<Arc<str>>,
}

/// Portable reference to an open scope
///
/// Obtained from [`Tracer::current_context`](crate::Tracer::current_context)
/// and attached on another thread so spans opened there nest under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanContext {
    /// Trace of the open scope
    pub trace_id: TraceId,
    /// Span id of the open scope
    pub span_id: SpanId,
    /// Experiment name in effect at that scope
    pub experiment: Option<String>,
}

impl From<Frame> for SpanContext {
    fn from(frame: Frame) -> Self {
        SpanContext {
            trace_id: frame.trace_id,
            span_id: frame.span_id,
            experiment: frame.experiment.map(|e| e.to_string()),
        }
    }
}

/// Keeps an attached [`SpanContext`] active on this thread until dropped
#[must_use = "the context is detached as soon as the guard is dropped"]
pub struct ContextGuard {
    span_id: SpanId,
    tracer_id: u64,
    _not_send: PhantomData<*const ()>,
}

impl ContextGuard {
    pub(crate) fn attach(tracer_id: u64, ctx: SpanContext) -> Self {
        let guard = ContextGuard {
            span_id: ctx.span_id,
            tracer_id,
            _not_send: PhantomData,
        };
        push(Frame {
            tracer_id,
            trace_id: ctx.trace_id,
            span_id: ctx.span_id,
            experiment: ctx.experiment.map(Arc::from),
        });
        guard
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        remove(self.tracer_id, self.span_id);
    }
}

pub(crate) fn push(frame: Frame) {
    STACK.with(|stack| stack.borrow_mut().push(frame));
}

/// Remove the innermost frame for `span_id`; frames normally leave in LIFO
/// order, but a guard dropped early must not take its children's frames.
pub(crate) fn remove(tracer_id: u64, span_id: SpanId) {
    STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        if let Some(pos) = stack
            .iter()
            .rposition(|f| f.tracer_id == tracer_id && f.span_id == span_id)
        {
            stack.remove(pos);
        }
    });
}

pub(crate) fn innermost(tracer_id: u64) -> Option<Frame> {
    STACK.with(|stack| {
        stack
            .borrow()
            .iter()
            .rev()
            .find(|f| f.tracer_id == tracer_id)
            .cloned()
    })
}

pub(crate) fn current_experiment(tracer_id: u64) -> Option<Arc<str>> {
    STACK.with(|stack| {
        stack
            .borrow()
            .iter()
            .rev()
            .filter(|f| f.tracer_id == tracer_id)
            .find_map(|f| f.experiment.clone())
    })
}
