//! Call-chain context threaded from one call into the next.

use crate::envelope::{Envelope, Trace};
use crate::error::HemeraError;
use crate::pattern::Carrier;

/// Continuation state of a call chain: trace, metadata, and the call's error.
///
/// Returned by every outbound call and handed to handlers. Passing it into the
/// next call propagates `meta` and `delegate`; the caller's copy is never mutated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    /// Span data observed on the last hop.
    pub trace: Trace,
    /// Opaque metadata riding alongside the pattern.
    pub meta: Option<Carrier>,
    /// Opaque delegate data riding alongside the pattern.
    pub delegate: Option<Carrier>,
    /// Failure of the call, if any. `None` means success.
    pub error: Option<HemeraError>,
}

impl Context {
    /// Reads trace, carriers, and a non-zero wire error from an envelope.
    #[must_use]
    pub fn from_envelope(envelope: &Envelope) -> Self {
        Self {
            trace: envelope.trace.clone(),
            meta: envelope.meta.clone(),
            delegate: envelope.delegate.clone(),
            error: envelope.error().cloned().map(HemeraError::Remote),
        }
    }

    /// A context carrying only an error.
    #[must_use]
    pub fn failed(error: HemeraError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::Error;

    #[test]
    fn from_envelope_copies_carriers_and_error() {
        let mut meta = Carrier::new();
        meta.insert("token".to_string(), json!("abc"));
        let envelope = Envelope {
            meta: Some(meta.clone()),
            trace: Trace {
                trace_id: "t1".to_string(),
                ..Trace::default()
            },
            error: Some(Error::new("MathError", "division by zero", 400)),
            ..Envelope::default()
        };

        let ctx = Context::from_envelope(&envelope);
        assert_eq!(ctx.meta, Some(meta));
        assert!(ctx.delegate.is_none());
        assert_eq!(ctx.trace.trace_id, "t1");
        assert_eq!(
            ctx.error,
            Some(HemeraError::Remote(Error::new("MathError", "division by zero", 400)))
        );
        assert!(!ctx.is_ok());
    }

    #[test]
    fn zero_wire_error_is_success() {
        let envelope = Envelope {
            error: Some(Error::default()),
            ..Envelope::default()
        };
        assert!(Context::from_envelope(&envelope).is_ok());
    }
}
