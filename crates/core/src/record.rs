//! Span record format
//!
//! A [`SpanRecord`] is the immutable, completed form of a span. It is created
//! once when the span closes, appended once to the span log, and never
//! changed afterwards. Parent/child structure is carried only by
//! `parent_span_id`, a lookup-only back-reference into the same trace.

use crate::error::Result;
use crate::scope::{ScopeKind, ATTR_EXPERIMENT, ATTR_NAME, ATTR_SCOPE_KIND, DEFAULT_EXPERIMENT};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Identifier shared by every span of one logical execution
pub type TraceId = u64;

/// Identifier of a span, unique within its trace
pub type SpanId = u64;

/// Nanoseconds since the Unix epoch
pub type Timestamp = i64;

/// Span attributes, keyed by name
///
/// A `BTreeMap` keeps serialized output stable across runs, which the
/// episode bundles rely on for byte-identical re-exports.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// Completion status of a span
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SpanStatus {
    /// Never set explicitly
    #[default]
    Unset,
    /// Closed normally
    Ok,
    /// Closed on a failure path
    Error,
}

impl SpanStatus {
    /// Stable string form, matching the serialized value.
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanStatus::Unset => "UNSET",
            SpanStatus::Ok => "OK",
            SpanStatus::Error => "ERROR",
        }
    }
}

/// Scalar attribute value
///
/// Serialized untagged, so a log line carries plain JSON scalars. JSON has
/// no NaN or infinity; such floats are written as `null` and read back as
/// [`AttributeValue::Null`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// JSON `null`
    Null,
    /// Boolean flag
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// UTF-8 string
    String(String),
}

impl AttributeValue {
    /// True for [`AttributeValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    /// Borrow the string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of the value; integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Float(f) => Some(*f),
            AttributeValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Integer payload, if this is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Boolean payload, if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Null => f.write_str("null"),
            AttributeValue::Bool(b) => write!(f, "{}", b),
            AttributeValue::Int(i) => write!(f, "{}", i),
            AttributeValue::Float(x) => write!(f, "{}", x),
            AttributeValue::String(s) => f.write_str(s),
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<i32> for AttributeValue {
    fn from(v: i32) -> Self {
        AttributeValue::Int(i64::from(v))
    }
}

impl From<u32> for AttributeValue {
    fn from(v: u32) -> Self {
        AttributeValue::Int(i64::from(v))
    }
}

impl From<usize> for AttributeValue {
    fn from(v: usize) -> Self {
        AttributeValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

/// NaN and infinities become [`AttributeValue::Null`], the value they read
/// back as from the log.
impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        if v.is_finite() {
            AttributeValue::Float(v)
        } else {
            AttributeValue::Null
        }
    }
}

impl From<f32> for AttributeValue {
    fn from(v: f32) -> Self {
        AttributeValue::from(f64::from(v))
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::String(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::String(v.to_string())
    }
}

impl From<&String> for AttributeValue {
    fn from(v: &String) -> Self {
        AttributeValue::String(v.clone())
    }
}

/// One completed span, as stored in the span log
///
/// Invariants:
/// - `span_id` is unique within `trace_id`
/// - if both timestamps are present, `end_time >= start_time`
/// - a set `parent_span_id` names a span of the same trace whose interval
///   contains this one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRecord {
    /// Trace this span belongs to
    pub trace_id: TraceId,
    /// Span identifier
    pub span_id: SpanId,
    /// Enclosing span, if any
    pub parent_span_id: Option<SpanId>,
    /// Span name
    pub name: String,
    /// Attribute bag
    pub attributes: Attributes,
    /// Start time in nanoseconds
    pub start_time: Option<Timestamp>,
    /// End time in nanoseconds
    pub end_time: Option<Timestamp>,
    /// Completion status
    pub status: SpanStatus,
}

impl SpanRecord {
    /// Scope kind carried in the reserved attribute, if any.
    pub fn scope_kind(&self) -> Option<ScopeKind> {
        self.attributes
            .get(ATTR_SCOPE_KIND)
            .and_then(AttributeValue::as_str)
            .and_then(ScopeKind::parse)
    }

    /// Check whether this span was opened as `kind`.
    pub fn is_scope(&self, kind: ScopeKind) -> bool {
        self.scope_kind() == Some(kind)
    }

    /// Human-readable scope name, falling back to the span name.
    pub fn scope_name(&self) -> &str {
        self.attributes
            .get(ATTR_NAME)
            .and_then(AttributeValue::as_str)
            .unwrap_or(&self.name)
    }

    /// Experiment an episode span belongs to.
    pub fn experiment_name(&self) -> &str {
        self.attributes
            .get(ATTR_EXPERIMENT)
            .and_then(AttributeValue::as_str)
            .unwrap_or(DEFAULT_EXPERIMENT)
    }

    /// Elapsed time, when both ends are known.
    pub fn duration_nanos(&self) -> Option<i64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(end.saturating_sub(start)),
            _ => None,
        }
    }

    /// A span with no parent starts its trace.
    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }

    /// Encode as a single log line (no trailing newline).
    pub fn to_json_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode one log line.
    pub fn from_json_line(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line)?)
    }
}

/// Current wall-clock time in nanoseconds since the Unix epoch.
pub fn now_nanos() -> Timestamp {
    Utc::now().timestamp_nanos_opt().unwrap_or(Timestamp::MAX)
}

/// Random, non-zero trace identifier.
pub fn new_trace_id() -> TraceId {
    random_nonzero_u64()
}

/// Random, non-zero span identifier.
pub fn new_span_id() -> SpanId {
    random_nonzero_u64()
}

fn random_nonzero_u64() -> u64 {
    let (_, low) = Uuid::new_v4().as_u64_pair();
    low.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn step_record() -> SpanRecord {
        let mut attributes = Attributes::new();
        attributes.insert(ATTR_SCOPE_KIND.to_string(), "step".into());
        attributes.insert("action".to_string(), "click".into());
        attributes.insert("reward".to_string(), 0.5.into());
        attributes.insert("done".to_string(), false.into());
        attributes.insert("tokens".to_string(), 42i64.into());
        SpanRecord {
            trace_id: 7,
            span_id: 11,
            parent_span_id: Some(3),
            name: "step".to_string(),
            attributes,
            start_time: Some(100),
            end_time: Some(250),
            status: SpanStatus::Ok,
        }
    }

    #[test]
    fn test_status_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&SpanStatus::Ok).unwrap(), "\"OK\"");
        assert_eq!(serde_json::to_string(&SpanStatus::Error).unwrap(), "\"ERROR\"");
        let unset: SpanStatus = serde_json::from_str("\"UNSET\"").unwrap();
        assert_eq!(unset, SpanStatus::Unset);
        assert_eq!(SpanStatus::Error.as_str(), "ERROR");
    }

    #[test]
    fn test_json_line_layout() {
        let line = step_record().to_json_line().unwrap();
        assert!(!line.contains('\n'));

        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["trace_id"], 7);
        assert_eq!(value["span_id"], 11);
        assert_eq!(value["parent_span_id"], 3);
        assert_eq!(value["status"], "OK");
        assert_eq!(value["attributes"]["action"], "click");
        assert_eq!(value["attributes"]["tokens"], 42);
    }

    #[test]
    fn test_null_fields_are_written() {
        let mut record = step_record();
        record.parent_span_id = None;
        record.start_time = None;
        let value: serde_json::Value =
            serde_json::from_str(&record.to_json_line().unwrap()).unwrap();
        assert!(value["parent_span_id"].is_null());
        assert!(value["start_time"].is_null());
        assert!(record.is_root());
        assert_eq!(record.duration_nanos(), None);
    }

    #[test]
    fn test_untagged_attribute_types_survive() {
        let record = step_record();
        let decoded = SpanRecord::from_json_line(&record.to_json_line().unwrap()).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.attributes["reward"].as_f64(), Some(0.5));
        assert_eq!(decoded.attributes["tokens"].as_i64(), Some(42));
        assert_eq!(decoded.attributes["done"].as_bool(), Some(false));
    }

    #[test]
    fn test_whole_float_stays_float() {
        let mut record = step_record();
        record
            .attributes
            .insert("reward".to_string(), AttributeValue::Float(0.0));
        let decoded = SpanRecord::from_json_line(&record.to_json_line().unwrap()).unwrap();
        assert_eq!(decoded.attributes["reward"], AttributeValue::Float(0.0));
    }

    #[test]
    fn test_non_finite_floats_read_back_as_null() {
        let mut record = step_record();
        record
            .attributes
            .insert("reward".to_string(), AttributeValue::Float(f64::NAN));
        record
            .attributes
            .insert("loss".to_string(), AttributeValue::Float(f64::NEG_INFINITY));

        let line = record.to_json_line().unwrap();
        let decoded = SpanRecord::from_json_line(&line).unwrap();
        assert_eq!(decoded.attributes["reward"], AttributeValue::Null);
        assert_eq!(decoded.attributes["loss"], AttributeValue::Null);
        assert_eq!(decoded.attributes["tokens"].as_i64(), Some(42));
    }

    #[test]
    fn test_non_finite_conversions_are_null() {
        assert_eq!(AttributeValue::from(f64::NAN), AttributeValue::Null);
        assert_eq!(AttributeValue::from(f64::INFINITY), AttributeValue::Null);
        assert_eq!(AttributeValue::from(f32::NAN), AttributeValue::Null);
        assert_eq!(AttributeValue::from(1.5f64), AttributeValue::Float(1.5));
        assert!(AttributeValue::Null.is_null());
        assert_eq!(AttributeValue::Null.as_f64(), None);
        assert_eq!(AttributeValue::Null.to_string(), "null");
    }

    #[test]
    fn test_scope_accessors() {
        let record = step_record();
        assert_eq!(record.scope_kind(), Some(ScopeKind::Step));
        assert!(record.is_scope(ScopeKind::Step));
        assert_eq!(record.scope_name(), "step");
        assert_eq!(record.experiment_name(), DEFAULT_EXPERIMENT);
        assert_eq!(record.duration_nanos(), Some(150));
    }

    #[test]
    fn test_malformed_line_is_error() {
        assert!(SpanRecord::from_json_line("{\"trace_id\": 1").is_err());
    }

    #[test]
    fn test_ids_are_nonzero_and_distinct() {
        let a = new_span_id();
        let b = new_span_id();
        assert_ne!(a, 0);
        assert_ne!(a, b);
        assert_ne!(new_trace_id(), 0);
    }

    proptest! {
        #[test]
        fn prop_string_attributes_roundtrip(key in "[a-z_]{1,12}", value in ".*") {
            let mut record = step_record();
            record.attributes.insert(key.clone(), AttributeValue::String(value.clone()));
            let decoded = SpanRecord::from_json_line(&record.to_json_line().unwrap()).unwrap();
            prop_assert_eq!(decoded.attributes.get(&key), Some(&AttributeValue::String(value)));
        }
    }
}
