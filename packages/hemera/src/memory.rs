//! In-process transport with queue-group and request/reply semantics.
//!
//! Callbacks run on spawned tokio tasks, so a subscriber may publish (or
//! call back into the transport) from inside its callback.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use hemera_core::TransportError;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::transport::{Message, MessageCallback, Subscription, Transport};

/// Subject prefix of reply inboxes created by [`MemoryTransport::request`].
pub const INBOX_PREFIX: &str = "_INBOX.";

struct Subscriber {
    queue_group: String,
    callback: MessageCallback,
}

#[derive(Default)]
struct SubjectSubscribers {
    members: Vec<Arc<Subscriber>>,
    /// Round-robin position per non-empty queue group.
    cursors: HashMap<String, usize>,
}

impl SubjectSubscribers {
    /// Picks the receivers of one message: every member without a queue
    /// group, plus one member of each queue group in turn.
    fn receivers(&mut self) -> Vec<Arc<Subscriber>> {
        let mut selected = Vec::new();
        let mut groups: HashMap<&str, Vec<&Arc<Subscriber>>> = HashMap::new();

        for member in &self.members {
            if member.queue_group.is_empty() {
                selected.push(Arc::clone(member));
            } else {
                groups.entry(member.queue_group.as_str()).or_default().push(member);
            }
        }

        for (group, members) in groups {
            let cursor = self.cursors.entry(group.to_string()).or_insert(0);
            let member = members[*cursor % members.len()];
            *cursor = cursor.wrapping_add(1);
            selected.push(Arc::clone(member));
        }

        selected
    }
}

/// Transport that keeps all subscriptions in process memory.
#[derive(Default)]
pub struct MemoryTransport {
    subjects: DashMap<String, SubjectSubscribers>,
    inboxes: DashMap<String, oneshot::Sender<Message>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl MemoryTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of subscriptions on `subject`.
    #[must_use]
    pub fn subscriber_count(&self, subject: &str) -> usize {
        self.subjects.get(subject).map_or(0, |subs| subs.members.len())
    }

    /// Refuses further operations and abandons pending requests.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.inboxes.clear();
        self.subjects.clear();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    fn deliver(&self, message: Message) {
        if let Some((_, inbox)) = self.inboxes.remove(&message.subject) {
            // The requester may already have timed out.
            let _ = inbox.send(message);
            return;
        }

        // Collect first so the shard lock is released before callbacks run.
        let receivers = match self.subjects.get_mut(&message.subject) {
            Some(mut subs) => subs.receivers(),
            None => {
                trace!(subject = %message.subject, "no subscribers");
                return;
            }
        };

        for receiver in receivers {
            let callback = Arc::clone(&receiver.callback);
            tokio::spawn(callback(message.clone()));
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn subscribe(
        &self,
        subject: &str,
        queue_group: &str,
        callback: MessageCallback,
    ) -> Result<Subscription, TransportError> {
        self.ensure_open()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.subjects
            .entry(subject.to_string())
            .or_default()
            .members
            .push(Arc::new(Subscriber {
                queue_group: queue_group.to_string(),
                callback,
            }));
        debug!(subject, queue_group, id, "subscribed");
        Ok(Subscription {
            id,
            subject: subject.to_string(),
            queue_group: queue_group.to_string(),
        })
    }

    async fn publish(&self, subject: &str, data: Vec<u8>) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.deliver(Message {
            subject: subject.to_string(),
            reply: None,
            data,
        });
        Ok(())
    }

    async fn request(
        &self,
        subject: &str,
        data: Vec<u8>,
        timeout: Duration,
    ) -> Result<Message, TransportError> {
        self.ensure_open()?;
        let inbox = format!("{INBOX_PREFIX}{}", uuid::Uuid::new_v4().simple());
        let (tx, rx) = oneshot::channel();
        self.inboxes.insert(inbox.clone(), tx);

        self.deliver(Message {
            subject: subject.to_string(),
            reply: Some(inbox.clone()),
            data,
        });

        let outcome = tokio::time::timeout(timeout, rx).await;
        self.inboxes.remove(&inbox);

        match outcome {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::sync::mpsc;

    use super::*;
    use crate::transport::message_callback;

    fn counting_callback(counter: Arc<AtomicUsize>) -> MessageCallback {
        message_callback(move |_msg| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    fn forwarding_callback(tx: mpsc::UnboundedSender<Message>) -> MessageCallback {
        message_callback(move |msg| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(msg);
            }
        })
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn publish_reaches_every_plain_subscriber() {
        let transport = MemoryTransport::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        transport
            .subscribe("math", "", counting_callback(Arc::clone(&first)))
            .await
            .unwrap();
        transport
            .subscribe("math", "", counting_callback(Arc::clone(&second)))
            .await
            .unwrap();

        transport.publish("math", b"{}".to_vec()).await.unwrap();
        settle().await;

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(transport.subscriber_count("math"), 2);
    }

    #[tokio::test]
    async fn queue_group_members_take_turns() {
        let transport = MemoryTransport::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        transport
            .subscribe("math", "math", counting_callback(Arc::clone(&first)))
            .await
            .unwrap();
        transport
            .subscribe("math", "math", counting_callback(Arc::clone(&second)))
            .await
            .unwrap();

        for _ in 0..4 {
            transport.publish("math", Vec::new()).await.unwrap();
        }
        settle().await;

        assert_eq!(first.load(Ordering::SeqCst), 2);
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn request_receives_reply_on_inbox() {
        let transport = Arc::new(MemoryTransport::new());
        let responder = Arc::clone(&transport);
        transport
            .subscribe(
                "echo",
                "echo",
                message_callback(move |msg: Message| {
                    let responder = Arc::clone(&responder);
                    async move {
                        if let Some(reply) = msg.reply {
                            responder.publish(&reply, msg.data).await.unwrap();
                        }
                    }
                }),
            )
            .await
            .unwrap();

        let reply = transport
            .request("echo", b"ping".to_vec(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply.data, b"ping");
        assert!(reply.subject.starts_with(INBOX_PREFIX));
        assert!(transport.inboxes.is_empty());
    }

    #[tokio::test]
    async fn request_without_responder_times_out() {
        let transport = MemoryTransport::new();
        let err = transport
            .request("nobody", Vec::new(), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Timeout { timeout_ms: 20 });
        assert!(transport.inboxes.is_empty());
    }

    #[tokio::test]
    async fn closed_transport_refuses_operations() {
        let transport = MemoryTransport::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        transport.close();

        assert!(transport.is_closed());
        assert_eq!(
            transport.publish("math", Vec::new()).await.unwrap_err(),
            TransportError::Closed
        );
        assert_eq!(
            transport
                .subscribe("math", "", forwarding_callback(tx))
                .await
                .unwrap_err(),
            TransportError::Closed
        );
    }

    #[tokio::test]
    async fn delivered_message_keeps_subject_and_data() {
        let transport = MemoryTransport::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport
            .subscribe("audit", "", forwarding_callback(tx))
            .await
            .unwrap();

        transport.publish("audit", b"payload".to_vec()).await.unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.subject, "audit");
        assert_eq!(msg.data, b"payload");
        assert!(msg.reply.is_none());
    }
}
