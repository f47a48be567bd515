//! # Error Handling
//!
//! Errors are classified into three kinds:
//!
//! - **Transport**: connection lost, bad framing, protocol version mismatch.
//!   Local to one session; never reaches the dispatcher task.
//! - **StreamFatal**: incoherent row order, tile from an unknown source,
//!   backlog overflow. Surfaced on the exception channel; the offending
//!   source(s) are removed and the stream may close.
//! - **Usage**: a precondition was violated by the caller (e.g. duplicate
//!   `addSource`). Indicates a bug in the caller, not an operational fault.
//!
//! Benign races (a tile for an already-closed URI) are not represented here
//! at all — they are silently dropped where they occur.
//!
//! Every variant carries just enough context to log usefully; this is a
//! deliberately smaller version of the severity/retryable classification
//! pattern used for capture errors in the screen-capture lineage this crate
//! grew out of, kept because it maps cleanly onto this crate's error kinds.

use std::fmt;

/// Severity used for logging; does not affect control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Warning,
    Error,
    Critical,
}

/// Errors produced by the dispatcher, receive buffer, and session layers.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Connection-local: bad framing, lost socket, protocol mismatch.
    #[error("transport error: {reason}")]
    Transport { reason: String },

    /// Stream-fatal: the stream (not just one connection) cannot continue.
    #[error("stream '{uri}' failed: {reason}")]
    StreamFatal { uri: String, reason: String },

    /// Caller violated a documented precondition.
    #[error("usage error: {reason}")]
    Usage { reason: String },
}

impl StreamError {
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport { reason: reason.into() }
    }

    pub fn stream_fatal(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StreamFatal { uri: uri.into(), reason: reason.into() }
    }

    pub fn usage(reason: impl Into<String>) -> Self {
        Self::Usage { reason: reason.into() }
    }

    /// Whether this error closes just one stream (vs. the whole session).
    pub fn is_stream_fatal(&self) -> bool {
        matches!(self, Self::StreamFatal { .. })
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Transport { .. } => ErrorSeverity::Warning,
            Self::StreamFatal { .. } => ErrorSeverity::Error,
            Self::Usage { .. } => ErrorSeverity::Critical,
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_fatal_is_classified_correctly() {
        let e = StreamError::stream_fatal("img://a", "incoherent row orders");
        assert!(e.is_stream_fatal());
        assert_eq!(e.severity(), ErrorSeverity::Error);
    }

    #[test]
    fn transport_is_not_stream_fatal() {
        let e = StreamError::transport("connection reset");
        assert!(!e.is_stream_fatal());
        assert_eq!(e.severity(), ErrorSeverity::Warning);
    }

    #[test]
    fn usage_is_critical() {
        let e = StreamError::usage("addSource called with a known id");
        assert_eq!(e.severity(), ErrorSeverity::Critical);
    }
}
