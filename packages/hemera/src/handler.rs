//! Handler shapes accepted by [`Hemera::add`](crate::Hemera::add).
//!
//! A handler receives the decoded request and a [`Reply`], and optionally the
//! inbound [`Context`]. The shape is chosen by the constructor, so a handler
//! with the wrong number of parameters does not compile.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use hemera_core::{Context, HemeraError};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::reply::Reply;

/// Future returned by a handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

type ReplyFn<T> = Arc<dyn Fn(T, Reply) -> HandlerFuture + Send + Sync>;
type ContextFn<T> = Arc<dyn Fn(T, Reply, Context) -> HandlerFuture + Send + Sync>;

/// Number of parameters a handler takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// `(request, reply)`
    Reply,
    /// `(request, reply, context)`
    ReplyWithContext,
}

enum Shape<T> {
    Reply(ReplyFn<T>),
    ReplyWithContext(ContextFn<T>),
}

/// A registered handler for requests decoded as `T`.
pub struct Handler<T> {
    shape: Shape<T>,
}

impl<T: Send + 'static> Handler<T> {
    /// Handler taking the request and a reply.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(T, Reply) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            shape: Shape::Reply(Arc::new(move |request: T, reply: Reply| -> HandlerFuture {
                Box::pin(f(request, reply))
            })),
        }
    }

    /// Handler that also receives the inbound context.
    pub fn with_context<F, Fut>(f: F) -> Self
    where
        F: Fn(T, Reply, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            shape: Shape::ReplyWithContext(Arc::new(
                move |request: T, reply: Reply, ctx: Context| -> HandlerFuture {
                    Box::pin(f(request, reply, ctx))
                },
            )),
        }
    }
}

impl<T> Handler<T> {
    #[must_use]
    pub fn arity(&self) -> Arity {
        match self.shape {
            Shape::Reply(_) => Arity::Reply,
            Shape::ReplyWithContext(_) => Arity::ReplyWithContext,
        }
    }

    /// Runs the handler. `ctx` is dropped for two-parameter handlers.
    pub fn invoke(&self, request: T, reply: Reply, ctx: Context) -> HandlerFuture {
        match &self.shape {
            Shape::Reply(f) => f(request, reply),
            Shape::ReplyWithContext(f) => f(request, reply, ctx),
        }
    }
}

impl<T> Clone for Handler<T> {
    fn clone(&self) -> Self {
        let shape = match &self.shape {
            Shape::Reply(f) => Shape::Reply(Arc::clone(f)),
            Shape::ReplyWithContext(f) => Shape::ReplyWithContext(Arc::clone(f)),
        };
        Self { shape }
    }
}

impl<T> std::fmt::Debug for Handler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler").field("arity", &self.arity()).finish()
    }
}

// ---------------------------------------------------------------------------
// Type-erased dispatch
// ---------------------------------------------------------------------------

/// A handler with its request type erased, as stored in the router.
pub(crate) trait Dispatch: Send + Sync {
    /// Decodes `request` and runs the handler. A request that does not decode
    /// is answered with a `DecodeFailure` error.
    fn dispatch(&self, request: JsonValue, reply: Reply, ctx: Context) -> HandlerFuture;

    fn arity(&self) -> Arity;
}

pub(crate) struct TypedDispatch<T> {
    handler: Handler<T>,
    _request: PhantomData<fn() -> T>,
}

impl<T> TypedDispatch<T> {
    pub(crate) fn new(handler: Handler<T>) -> Self {
        Self {
            handler,
            _request: PhantomData,
        }
    }
}

impl<T: DeserializeOwned + Send + 'static> Dispatch for TypedDispatch<T> {
    fn dispatch(&self, request: JsonValue, reply: Reply, ctx: Context) -> HandlerFuture {
        match serde_json::from_value::<T>(request) {
            Ok(decoded) => self.handler.invoke(decoded, reply, ctx),
            Err(e) => {
                let err = HemeraError::Decode(e.to_string());
                Box::pin(async move {
                    warn!(error = %err, "request does not decode into the handler type");
                    if let Err(send_err) = reply.send_error(err.to_wire()).await {
                        warn!(error = %send_err, "failed to send decode failure");
                    }
                })
            }
        }
    }

    fn arity(&self) -> Arity {
        self.handler.arity()
    }
}
