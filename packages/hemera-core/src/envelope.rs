//! Wire envelope shared by calls and replies.
//!
//! Encoded as JSON with fixed member names:
//! `pattern`, `meta`, `delegate`, `result`, `trace`, `request`, `error`.
//! Every member defaults when absent so partially filled packets from other
//! implementations still decode.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{Error, HemeraError};
use crate::pattern::Carrier;

/// Delivery semantics of a packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    /// Request/reply: the sender waits for exactly one answer.
    #[default]
    Request,
    /// Fire-and-forget publish; no reply is expected.
    Pubsub,
}

/// Correlation data of a packet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub request_type: RequestType,
}

impl RequestInfo {
    pub fn new(id: impl Into<String>, request_type: RequestType) -> Self {
        Self {
            id: id.into(),
            request_type,
        }
    }
}

/// Distributed-tracing span data carried by every packet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Trace {
    pub trace_id: String,
    pub parent_span_id: String,
    pub span_id: String,
    /// Send time in milliseconds since Unix epoch.
    pub timestamp: i64,
    pub service: String,
    pub method: String,
    /// Round-trip time in milliseconds, filled in by the caller.
    pub duration: i64,
}

/// The packet exchanged on the transport for both calls and replies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Envelope {
    pub pattern: JsonValue,
    pub meta: Option<Carrier>,
    pub delegate: Option<Carrier>,
    pub result: JsonValue,
    pub trace: Trace,
    pub request: RequestInfo,
    pub error: Option<Error>,
}

impl Envelope {
    /// Encodes the envelope as JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `HemeraError::Encode` if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, HemeraError> {
        serde_json::to_vec(self).map_err(|e| HemeraError::Encode(e.to_string()))
    }

    /// Decodes an envelope from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `HemeraError::Decode` if the bytes are not a valid envelope.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, HemeraError> {
        serde_json::from_slice(bytes).map_err(|e| HemeraError::Decode(e.to_string()))
    }

    /// The carried error, ignoring a zero-valued one.
    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref().filter(|err| !err.is_zero())
    }
}
