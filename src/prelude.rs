//! Convenient imports for agenttrace.
//!
//! ```ignore
//! use agenttrace::prelude::*;
//!
//! let tracer = Tracer::open("./runs")?;
//! let _ep = tracer.start_episode("episode_0", Some("demo_experiment"));
//! tracer.log([("reward", AttributeValue::from(1.0))]);
//! ```

// Main entry point
pub use crate::tracer::{Tracer, TracerBuilder};

// Configuration
pub use crate::config::TracerConfig;
pub use agenttrace_durability::DurabilityMode;

// Scopes and context
pub use crate::context::{ContextGuard, SpanContext};
pub use crate::scope::ScopeGuard;

// Error handling
pub use agenttrace_core::{Error, Result};

// Span model
pub use agenttrace_core::{AttributeValue, ScopeKind, SpanRecord, SpanStatus};

// Export seam
pub use agenttrace_export::SpanExporter;
