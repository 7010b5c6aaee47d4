//! Transport seam: the publish/subscribe/request primitives dispatch is built on.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hemera_core::TransportError;

/// Future returned by a subscription callback.
pub type CallbackFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Callback invoked once per delivered message.
pub type MessageCallback = Arc<dyn Fn(Message) -> CallbackFuture + Send + Sync>;

/// Boxes an async closure into a [`MessageCallback`].
pub fn message_callback<F, Fut>(f: F) -> MessageCallback
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |message: Message| -> CallbackFuture { Box::pin(f(message)) })
}

/// A message as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Subject the message was published on.
    pub subject: String,
    /// Address to publish the answer to, when the sender expects one.
    pub reply: Option<String>,
    /// Encoded payload.
    pub data: Vec<u8>,
}

/// Handle of an established subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: u64,
    pub subject: String,
    pub queue_group: String,
}

/// Publish/subscribe transport with request/reply support.
///
/// Implementations must be safe for concurrent use; callbacks may run
/// concurrently with each other.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Subscribes to `subject`. Within one non-empty `queue_group` each
    /// message reaches exactly one member; an empty group receives every message.
    async fn subscribe(
        &self,
        subject: &str,
        queue_group: &str,
        callback: MessageCallback,
    ) -> Result<Subscription, TransportError>;

    /// Fire-and-forget send.
    async fn publish(&self, subject: &str, data: Vec<u8>) -> Result<(), TransportError>;

    /// Sends `data` and waits up to `timeout` for a single reply.
    async fn request(
        &self,
        subject: &str,
        data: Vec<u8>,
        timeout: Duration,
    ) -> Result<Message, TransportError>;
}
