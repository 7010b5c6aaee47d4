//! Error types: the structured wire error and the dispatch error taxonomy.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Structured error carried in the `error` member of an envelope.
///
/// A zero-valued instance means "no error" and is never put on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(default)]
#[error("{message}")]
pub struct Error {
    pub name: String,
    pub message: String,
    pub code: i16,
}

impl Error {
    pub fn new(name: impl Into<String>, message: impl Into<String>, code: i16) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            code,
        }
    }

    /// Error carrying only a message.
    pub fn simple(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.name.is_empty() && self.message.is_empty() && self.code == 0
    }
}

/// Which entry point a validation error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Add,
    Act,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Add => f.write_str("add"),
            Operation::Act => f.write_str("act"),
        }
    }
}

/// Failures of the underlying publish/subscribe transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("transport connection is closed")]
    Closed,
    #[error("publish to {subject} failed: {reason}")]
    Publish { subject: String, reason: String },
}

/// Errors surfaced by registration, dispatch, and outbound calls.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HemeraError {
    #[error("topic is required for {0}")]
    TopicRequired(Operation),
    #[error("topic must be a string")]
    InvalidTopicType,
    #[error("pattern is already registered: {method}")]
    DuplicatePattern { method: String },
    #[error("no registered pattern matches: {method}")]
    PatternNotFound { method: String },
    #[error("decode failure: {0}")]
    Decode(String),
    #[error("encode failure: {0}")]
    Encode(String),
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error("remote error: {0}")]
    Remote(Error),
}

impl HemeraError {
    /// Wire representation sent back to a caller.
    #[must_use]
    pub fn to_wire(&self) -> Error {
        match self {
            HemeraError::Remote(err) => err.clone(),
            HemeraError::Decode(_) => Error::new("DecodeFailure", self.to_string(), 0),
            HemeraError::PatternNotFound { .. } => Error::new("PatternNotFound", self.to_string(), 0),
            other => Error::new("HemeraError", other.to_string(), 0),
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, HemeraError::Transport(TransportError::Timeout { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_error_is_zero() {
        assert!(Error::default().is_zero());
        assert!(!Error::simple("boom").is_zero());
        assert!(!Error::new("", "", 1).is_zero());
    }

    #[test]
    fn wire_error_decodes_with_missing_members() {
        let err: Error = serde_json::from_str(r#"{"message":"boom"}"#).unwrap();
        assert_eq!(err, Error::simple("boom"));
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn decode_failure_maps_to_named_wire_error() {
        let wire = HemeraError::Decode("missing field `a`".to_string()).to_wire();
        assert_eq!(wire.name, "DecodeFailure");
        assert!(wire.message.contains("missing field"));
    }

    #[test]
    fn timeout_is_detected() {
        let err = HemeraError::from(TransportError::Timeout { timeout_ms: 50 });
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "transport failure: request timed out after 50ms");
    }
}
