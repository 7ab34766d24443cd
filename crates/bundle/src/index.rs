//! Ancestry index over the flat span log
//!
//! The log is treated as an arena keyed by `(trace_id, span_id)`;
//! `parent_span_id` is a lookup-only back-reference into it. The index is
//! rebuilt from a fresh scan on every materialization.

use agenttrace_core::{Error, Result, SpanId, SpanRecord, TraceId};
use rustc_hash::FxHashMap;

/// Span lookup by id, borrowing the scanned records
pub struct SpanIndex<'a> {
    by_id: FxHashMap<(TraceId, SpanId), &'a SpanRecord>,
}

impl<'a> SpanIndex<'a> {
    /// Index `records`; a repeated id keeps the later record.
    pub fn new(records: &'a [SpanRecord]) -> Self {
        let mut by_id = FxHashMap::default();
        by_id.reserve(records.len());
        for record in records {
            by_id.insert((record.trace_id, record.span_id), record);
        }
        SpanIndex { by_id }
    }

    /// Number of distinct spans indexed.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Check if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Look up a span.
    pub fn get(&self, trace_id: TraceId, span_id: SpanId) -> Option<&'a SpanRecord> {
        self.by_id.get(&(trace_id, span_id)).copied()
    }

    /// Walk `span`'s parent chain looking for `ancestor_id` in `ancestor_trace`.
    ///
    /// Reaching the ancestor returns `true`. Reaching a root, or a parent
    /// that is not in the index, returns `false`. A chain longer than the
    /// index can only be a loop and fails with [`Error::AncestryCycle`].
    pub fn is_descendant(
        &self,
        span: &SpanRecord,
        ancestor_trace: TraceId,
        ancestor_id: SpanId,
    ) -> Result<bool> {
        if span.trace_id != ancestor_trace {
            return Ok(false);
        }

        let mut current = span;
        let mut hops = 0usize;
        while let Some(parent_id) = current.parent_span_id {
            if parent_id == ancestor_id {
                return Ok(true);
            }
            current = match self.get(span.trace_id, parent_id) {
                Some(parent) => parent,
                None => return Ok(false),
            };
            hops += 1;
            if hops > self.by_id.len() {
                return Err(Error::AncestryCycle {
                    span_id: span.span_id,
                });
            }
        }
        Ok(false)
    }
}
