//! Dispatch core: `add` registers handlers, `act` and `emit` call them.

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use hemera_core::{
    clean_pattern, method_name, topic_of, Context, Envelope, HemeraError, Operation, Pattern,
    PatternSet, Patterned, RequestInfo, RequestType, Router, Trace,
};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::{debug, error, info_span, warn, Instrument};

use crate::config::HemeraConfig;
use crate::handler::{Dispatch, Handler, TypedDispatch};
use crate::reply::Reply;
use crate::transport::{message_callback, Message, Subscription, Transport};

type SharedRouter = Arc<RwLock<Router<Arc<dyn Dispatch>>>>;

/// Outcome of an [`Hemera::act`] call.
///
/// `context` is always present; `context.error` is the uniform failure signal.
#[derive(Debug, Clone)]
pub struct ActResponse<R> {
    /// Decoded result, absent on error or when the responder sent none.
    pub result: Option<R>,
    pub context: Context,
}

impl<R> ActResponse<R> {
    fn failed(context: Context) -> Self {
        Self {
            result: None,
            context,
        }
    }

    /// Splits into the result or the call's error.
    ///
    /// # Errors
    ///
    /// Returns the error recorded in the context.
    pub fn into_result(self) -> Result<Option<R>, HemeraError> {
        match self.context.error {
            Some(err) => Err(err),
            None => Ok(self.result),
        }
    }
}

/// Pattern-routed request/reply over a [`Transport`].
///
/// Cheap to clone; clones share the router and transport.
#[derive(Clone)]
pub struct Hemera {
    transport: Arc<dyn Transport>,
    router: SharedRouter,
    config: Arc<HemeraConfig>,
}

impl Hemera {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, config: HemeraConfig) -> Self {
        Self {
            transport,
            router: Arc::new(RwLock::new(Router::new(config.strategy))),
            config: Arc::new(config),
        }
    }

    #[must_use]
    pub fn config(&self) -> &HemeraConfig {
        &self.config
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Registered patterns in registration order.
    #[must_use]
    pub fn patterns(&self) -> Vec<Pattern> {
        self.router
            .read()
            .list()
            .into_iter()
            .map(|set| set.pattern.clone())
            .collect()
    }

    /// Number of registered patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.router.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.router.read().is_empty()
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Registers `handler` for `pattern` and subscribes to the pattern's topic
    /// with a queue group named after the topic.
    ///
    /// Inbound messages are routed through the shared router (on their `T`
    /// form when they decode as `T`, on the wire pattern otherwise) and handed
    /// to whichever registration matches best, which decodes its own request
    /// type. Any subscription on a topic therefore serves every pattern on it.
    ///
    /// # Errors
    ///
    /// - `TopicRequired` / `InvalidTopicType` when `pattern` has no usable topic.
    /// - `DuplicatePattern` when the exact field set is already registered.
    /// - `Transport` when the subscription fails; the registration is withdrawn.
    pub async fn add<P, T>(&self, pattern: &P, handler: Handler<T>) -> Result<Subscription, HemeraError>
    where
        P: Patterned + ?Sized,
        T: Patterned + DeserializeOwned + Send + 'static,
    {
        let topic = topic_of(pattern, Operation::Add)?;

        let set = {
            let mut router = self.router.write();
            if router.contains_exact(pattern) {
                return Err(HemeraError::DuplicatePattern {
                    method: PatternSet::from_pattern(pattern).method(),
                });
            }
            let dispatch: Arc<dyn Dispatch> = Arc::new(TypedDispatch::new(handler));
            router.add(pattern, dispatch)
        };

        let router = Arc::clone(&self.router);
        let transport = Arc::clone(&self.transport);
        let callback = message_callback(move |message: Message| {
            handle_inbound::<T>(Arc::clone(&router), Arc::clone(&transport), message)
        });

        match self.transport.subscribe(&topic, &topic, callback).await {
            Ok(subscription) => {
                debug!(
                    topic = %topic,
                    method = %set.method(),
                    weight = set.weight,
                    arity = ?set.payload.arity(),
                    "handler registered"
                );
                Ok(subscription)
            }
            Err(err) => {
                self.router.write().remove(&set);
                warn!(topic = %topic, error = %err, "subscription failed, registration withdrawn");
                Err(err.into())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Outbound calls
    // -----------------------------------------------------------------------

    /// Calls the service matching `pattern` and decodes its result as `R`.
    ///
    /// Starts a new trace. Meta and delegate come from the pattern itself.
    pub async fn act<P, R>(&self, pattern: &P) -> ActResponse<R>
    where
        P: Patterned + ?Sized,
        R: DeserializeOwned,
    {
        self.call(pattern, None).await
    }

    /// Like [`Hemera::act`], continuing from the context of an earlier call.
    ///
    /// Meta and delegate of `prior` take precedence over the pattern's own and
    /// its span becomes the parent span. `prior` is not modified.
    pub async fn act_with_context<P, R>(&self, pattern: &P, prior: &Context) -> ActResponse<R>
    where
        P: Patterned + ?Sized,
        R: DeserializeOwned,
    {
        self.call(pattern, Some(prior)).await
    }

    /// Publishes `pattern` without waiting for an answer.
    ///
    /// # Errors
    ///
    /// Fails on a missing topic, an encoding failure, or a transport failure.
    pub async fn emit<P>(&self, pattern: &P) -> Result<(), HemeraError>
    where
        P: Patterned + ?Sized,
    {
        let (topic, envelope) = outbound(pattern, None, RequestType::Pubsub)?;
        let bytes = envelope.to_bytes()?;
        self.transport.publish(&topic, bytes).await?;
        debug!(topic = %topic, method = %envelope.trace.method, "pattern emitted");
        Ok(())
    }

    async fn call<P, R>(&self, pattern: &P, prior: Option<&Context>) -> ActResponse<R>
    where
        P: Patterned + ?Sized,
        R: DeserializeOwned,
    {
        let (topic, envelope) = match outbound(pattern, prior, RequestType::Request) {
            Ok(outbound) => outbound,
            Err(err) => return ActResponse::failed(Context::failed(err)),
        };

        let span = info_span!(
            "act",
            topic = %topic,
            method = %envelope.trace.method,
            request_id = %envelope.request.id,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        async move {
            // Context reported when the call fails before a reply arrives.
            let sent = Context {
                trace: envelope.trace.clone(),
                meta: envelope.meta.clone(),
                delegate: envelope.delegate.clone(),
                error: None,
            };

            let start = Instant::now();
            let response = self.exchange(&topic, &envelope).await;
            let duration_ms = i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX);
            tracing::Span::current().record("duration_ms", duration_ms);

            let reply = match response {
                Ok(reply) => reply,
                Err(err) => {
                    tracing::Span::current().record("outcome", "failed");
                    debug!(error = %err, "act failed");
                    return ActResponse::failed(Context {
                        error: Some(err),
                        ..sent
                    });
                }
            };

            let mut context = Context::from_envelope(&reply);
            context.trace.duration = duration_ms;

            let mut result = None;
            if context.error.is_none() && !reply.result.is_null() {
                match serde_json::from_value::<R>(reply.result) {
                    Ok(decoded) => result = Some(decoded),
                    Err(e) => {
                        warn!(error = %e, "result does not decode into the requested type");
                        context.error = Some(HemeraError::Decode(e.to_string()));
                    }
                }
            }

            let outcome = if context.is_ok() { "ok" } else { "error" };
            tracing::Span::current().record("outcome", outcome);
            debug!(outcome, "act complete");

            ActResponse { result, context }
        }
        .instrument(span)
        .await
    }

    async fn exchange(&self, topic: &str, envelope: &Envelope) -> Result<Envelope, HemeraError> {
        let bytes = envelope.to_bytes()?;
        let message = self
            .transport
            .request(topic, bytes, self.config.timeout)
            .await?;
        Envelope::from_slice(&message.data)
    }
}

impl std::fmt::Debug for Hemera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hemera")
            .field("config", &self.config)
            .field("patterns", &self.len())
            .finish_non_exhaustive()
    }
}

/// Builds the envelope of an outbound call.
fn outbound<P>(
    pattern: &P,
    prior: Option<&Context>,
    request_type: RequestType,
) -> Result<(String, Envelope), HemeraError>
where
    P: Patterned + ?Sized,
{
    let topic = topic_of(pattern, Operation::Act)?;
    let method = PatternSet::from_pattern(pattern).method();

    let meta = prior.and_then(|ctx| ctx.meta.clone()).or_else(|| pattern.meta());
    let delegate = prior
        .and_then(|ctx| ctx.delegate.clone())
        .or_else(|| pattern.delegate());

    let trace = Trace {
        trace_id: new_id(),
        parent_span_id: prior.map(|ctx| ctx.trace.span_id.clone()).unwrap_or_default(),
        span_id: new_id(),
        timestamp: now_millis(),
        service: topic.clone(),
        method,
        duration: 0,
    };

    let envelope = Envelope {
        pattern: JsonValue::Object(clean_pattern(pattern)),
        meta,
        delegate,
        result: JsonValue::Null,
        trace,
        request: RequestInfo::new(new_id(), request_type),
        error: None,
    };
    Ok((topic, envelope))
}

// ---------------------------------------------------------------------------
// Inbound dispatch
// ---------------------------------------------------------------------------

async fn handle_inbound<T>(router: SharedRouter, transport: Arc<dyn Transport>, message: Message)
where
    T: Patterned + DeserializeOwned + Send + 'static,
{
    let envelope = match Envelope::from_slice(&message.data) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(subject = %message.subject, error = %err, "dropping undecodable envelope");
            return;
        }
    };
    let ctx = Context::from_envelope(&envelope);

    // Route on the handler's own view of the pattern when it decodes; another
    // registration on the same topic may own a differently shaped request, so
    // fall back to the scalar members of the wire pattern.
    let fields = match serde_json::from_value::<T>(envelope.pattern.clone()) {
        Ok(request) => Some(PatternSet::from_pattern(&request).fields),
        Err(_) => envelope
            .pattern
            .as_object()
            .map(|map| PatternSet::from_pattern(&Pattern::from_json_map(map)).fields),
    };
    let Some(fields) = fields else {
        let err = HemeraError::Decode("pattern is not a JSON object".to_string());
        warn!(subject = %message.subject, error = %err, "inbound pattern does not decode");
        let reply = Reply::new(transport, message.reply, envelope.pattern, ctx);
        if let Err(send_err) = reply.send_error(err.to_wire()).await {
            warn!(error = %send_err, "failed to answer with decode failure");
        }
        return;
    };

    let resolved = router.read().lookup_fields(&fields);
    let Some(resolved) = resolved else {
        let err = HemeraError::PatternNotFound {
            method: method_name(&fields),
        };
        error!(subject = %message.subject, error = %err, "inbound message dropped");
        return;
    };

    let span = info_span!(
        "dispatch",
        topic = %message.subject,
        method = %resolved.method(),
        request_id = %envelope.request.id,
        duration_ms = tracing::field::Empty,
    );

    let reply = Reply::new(transport, message.reply, resolved.pattern.to_json(), ctx.clone());
    async move {
        let start = Instant::now();
        resolved.payload.dispatch(envelope.pattern, reply, ctx).await;

        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::Span::current().record("duration_ms", duration_ms);
        debug!(duration_ms, "handler complete");
    }
    .instrument(span)
    .await;
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
