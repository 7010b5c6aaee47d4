//! Reply sender bound to the reply address of one inbound call.

use std::any::Any;
use std::sync::Arc;

use hemera_core::{Context, Envelope, Error, HemeraError, RequestInfo, RequestType};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::transport::Transport;

/// Answers one inbound call.
///
/// Every send method consumes the `Reply`, so a handler can answer at most once.
/// Dropping it unanswered leaves the caller to time out.
pub struct Reply {
    transport: Arc<dyn Transport>,
    reply_to: Option<String>,
    pattern: JsonValue,
    context: Context,
}

impl Reply {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        reply_to: Option<String>,
        pattern: JsonValue,
        context: Context,
    ) -> Self {
        Self {
            transport,
            reply_to,
            pattern,
            context,
        }
    }

    /// Context of the inbound call.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Registered pattern the call was routed to.
    #[must_use]
    pub fn pattern(&self) -> &JsonValue {
        &self.pattern
    }

    /// Whether the caller is waiting for an answer.
    #[must_use]
    pub fn expects_answer(&self) -> bool {
        self.reply_to.is_some()
    }

    /// Sends `payload` as the result. An [`Error`] payload is sent as the
    /// reply's error instead, like [`Reply::send_error`].
    ///
    /// # Errors
    ///
    /// Returns `HemeraError::Encode` if `payload` cannot be serialized, or a
    /// transport error if publishing fails.
    pub async fn send<R: Serialize + 'static>(self, payload: R) -> Result<(), HemeraError> {
        let error = wire_error_of(&payload);
        if let Some(error) = error {
            return self.send_error(error).await;
        }
        let result = serde_json::to_value(payload).map_err(|e| HemeraError::Encode(e.to_string()))?;
        self.publish(result, None).await
    }

    /// Sends an error. A zero-valued error is sent as success with no result.
    ///
    /// # Errors
    ///
    /// Returns a transport error if publishing fails.
    pub async fn send_error(self, error: Error) -> Result<(), HemeraError> {
        let error = (!error.is_zero()).then_some(error);
        self.publish(JsonValue::Null, error).await
    }

    /// Sends either side of a handler outcome.
    ///
    /// # Errors
    ///
    /// See [`Reply::send`] and [`Reply::send_error`].
    pub async fn send_result<R: Serialize + 'static>(self, outcome: Result<R, Error>) -> Result<(), HemeraError> {
        match outcome {
            Ok(result) => self.send(result).await,
            Err(error) => self.send_error(error).await,
        }
    }

    async fn publish(self, result: JsonValue, error: Option<Error>) -> Result<(), HemeraError> {
        let Some(reply_to) = self.reply_to else {
            debug!(pattern = %self.pattern, "caller expects no answer, dropping reply");
            return Ok(());
        };

        let envelope = Envelope {
            pattern: self.pattern,
            meta: self.context.meta,
            delegate: self.context.delegate,
            result,
            trace: self.context.trace,
            request: RequestInfo::new(uuid::Uuid::new_v4().to_string(), RequestType::Request),
            error,
        };
        let bytes = envelope.to_bytes()?;
        self.transport.publish(&reply_to, bytes).await?;
        Ok(())
    }
}

/// The wire error when `payload` is one.
fn wire_error_of<R: 'static>(payload: &R) -> Option<Error> {
    let payload: &dyn Any = payload;
    payload.downcast_ref::<Error>().cloned()
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reply")
            .field("reply_to", &self.reply_to)
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}
