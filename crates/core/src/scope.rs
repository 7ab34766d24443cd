//! Scope tagging
//!
//! Spans opened through the tracer carry a reserved scope-kind attribute so
//! the flat span log can be regrouped into experiment / episode / step
//! without storing ancestry directly.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved attribute holding the [`ScopeKind`] of a span
pub const ATTR_SCOPE_KIND: &str = "agenttrace.scope";

/// Reserved attribute holding the human-readable scope name
pub const ATTR_NAME: &str = "agenttrace.name";

/// Reserved attribute holding the experiment an episode belongs to
pub const ATTR_EXPERIMENT: &str = "agenttrace.experiment";

/// Attribute set by `record_error` on a failed span
pub const ERROR_MESSAGE: &str = "error.message";

/// Experiment name used when an episode is opened outside any experiment
pub const DEFAULT_EXPERIMENT: &str = "default";

/// Application-level nesting of spans: Experiment ⊃ Episode ⊃ Step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    /// A whole benchmark run
    Experiment,
    /// One task run; the unit exported as a bundle
    Episode,
    /// One agent step inside an episode
    Step,
}

impl ScopeKind {
    /// Attribute value for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::Experiment => "experiment",
            ScopeKind::Episode => "episode",
            ScopeKind::Step => "step",
        }
    }

    /// Parse an attribute value back into a kind.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "experiment" => Some(ScopeKind::Experiment),
            "episode" => Some(ScopeKind::Episode),
            "step" => Some(ScopeKind::Step),
            _ => None,
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
