//! Error types shared across the agenttrace workspace.
//!
//! Every crate in the workspace returns [`Result`] so failures from the span
//! log, the bundle writer, and the export worker compose with `?`.

use thiserror::Error;

/// All agenttrace errors.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the span log or the bundle directory
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A non-blank line of the span log failed to parse
    #[error("corrupt span log at line {line}: {reason}")]
    Corrupt {
        /// 1-based line number in the log file
        line: usize,
        /// Parser message
        reason: String,
    },

    /// Zip archive could not be built or read
    #[error("archive error: {0}")]
    Archive(String),

    /// A parent chain loops back on itself
    #[error("parent chain of span {span_id} forms a cycle")]
    AncestryCycle {
        /// Span whose chain was being walked
        span_id: u64,
    },

    /// Materialization of an episode bundle failed
    #[error("materialization of episode '{episode}' failed: {reason}")]
    Materialization {
        /// Episode name
        episode: String,
        /// Underlying failure
        reason: String,
    },

    /// Pending work did not finish before the flush deadline
    #[error("flush timed out with {pending} materializations still pending")]
    FlushTimeout {
        /// Jobs still outstanding when the deadline passed
        pending: usize,
    },

    /// The store or exporter has been shut down
    #[error("{0} is closed")]
    Closed(&'static str),

    /// The background worker exited before the job could be handed over
    #[error("materialization worker is not running")]
    WorkerGone,

    /// Rejected configuration value
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for agenttrace operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error is a flush deadline expiring.
    ///
    /// Timeouts are best-effort signals: the pending work keeps running on the
    /// worker, only the wait was abandoned.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::FlushTimeout { .. })
    }

    /// Check if this error reports an unreadable span log line.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corrupt { .. })
    }

    /// Wrap an error raised while materializing `episode`.
    pub fn materialization(episode: impl Into<String>, source: &Error) -> Self {
        Error::Materialization {
            episode: episode.into(),
            reason: source.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
