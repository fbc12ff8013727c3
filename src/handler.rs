//! Handler trait, handler replies, and closure adapters.
//!
//! # How handlers are stored
//!
//! A middleware tree holds handlers of many different concrete types, so
//! every handler is type-erased behind `Arc<dyn Handler>`. The chain from
//! user code to the vtable call is:
//!
//! ```text
//! handler::sync(|tx| Ok("hi"))                 ← user writes this
//!        ↓ Middleware::leaf(..)
//! Arc::new(SyncFn(closure))                     ← heap-allocated wrapper
//!        ↓ stored in the tree as Middleware::Leaf(Arc<dyn Handler>)
//! handler.call(&mut tx)  at request time        ← one vtable dispatch
//!        ↓
//! BoxFuture<Result<Reply, Error>>               ← classified by the resolver
//! ```
//!
//! Any type can implement [`Handler`] directly. Path routers, method filters
//! and the negotiator are plain structs that do exactly that.

use std::fmt;
use std::future::Future;

use bytes::Bytes;
use futures::FutureExt;
use futures::future::{self, BoxFuture};
use http::StatusCode;

use crate::error::Error;
use crate::flow::Flow;
use crate::middleware::Middleware;
use crate::transaction::Transaction;

// ── Handler trait ─────────────────────────────────────────────────────────────

/// The entry point the resolver invokes for `Leaf` and `ErrorHandler`
/// entries.
///
/// The returned future borrows the transaction for as long as it runs, so an
/// async handler can await and write to the response in between.
pub trait Handler: Send + Sync + 'static {
    fn call<'a>(&'a self, tx: &'a mut Transaction) -> BoxFuture<'a, Result<Reply, Error>>;
}

// ── Reply ─────────────────────────────────────────────────────────────────────

/// What a handler produced.
///
/// The resolver classifies a reply exactly like the tree entry of the same
/// shape: a status ends the response with that code, a body is sent, a flow
/// token steers the walk.
pub enum Reply {
    /// Nothing to say. The walk moves on.
    Continue,
    Flow(Flow),
    /// Ends the response with this status. Codes HTTP cannot express raise
    /// [`Error::InvalidStatus`] instead.
    Status(i64),
    /// Sends the body and ends the response.
    Body(Bytes),
    /// A list result. Sent as the response body, chunk after chunk.
    ///
    /// This is *not* a branch: a list placed in the tree is walked, a list
    /// returned from a handler is sent.
    Chunks(Vec<Bytes>),
    /// Work that finishes later. Awaited before classification.
    Pending(BoxFuture<'static, Result<Reply, Error>>),
    /// A tree entry to resolve in place of this reply.
    Entry(Middleware),
}

impl Reply {
    /// Wraps a future whose output is classified once it completes.
    pub fn pending<F, R>(fut: F) -> Self
    where
        F: Future<Output = Result<R, Error>> + Send + 'static,
        R: Into<Reply>,
    {
        Self::Pending(fut.map(|res| res.map(Into::into)).boxed())
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue      => f.write_str("Continue"),
            Self::Flow(flow)    => f.debug_tuple("Flow").field(flow).finish(),
            Self::Status(code)  => f.debug_tuple("Status").field(code).finish(),
            Self::Body(body)    => f.debug_tuple("Body").field(&body.len()).finish(),
            Self::Chunks(parts) => f.debug_tuple("Chunks").field(&parts.len()).finish(),
            Self::Pending(_)    => f.write_str("Pending"),
            Self::Entry(entry)  => f.debug_tuple("Entry").field(entry).finish(),
        }
    }
}

impl From<()> for Reply {
    fn from(_: ()) -> Self { Self::Continue }
}

impl<T: Into<Reply>> From<Option<T>> for Reply {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Continue, Into::into)
    }
}

impl From<Flow> for Reply {
    fn from(flow: Flow) -> Self { Self::Flow(flow) }
}

impl From<StatusCode> for Reply {
    fn from(status: StatusCode) -> Self { Self::Status(status.as_u16().into()) }
}

impl From<&'static str> for Reply {
    fn from(body: &'static str) -> Self { Self::Body(Bytes::from_static(body.as_bytes())) }
}

impl From<String> for Reply {
    fn from(body: String) -> Self { Self::Body(body.into()) }
}

impl From<Bytes> for Reply {
    fn from(body: Bytes) -> Self { Self::Body(body) }
}

impl From<Vec<u8>> for Reply {
    fn from(body: Vec<u8>) -> Self { Self::Body(body.into()) }
}

impl From<Vec<Bytes>> for Reply {
    fn from(chunks: Vec<Bytes>) -> Self { Self::Chunks(chunks) }
}

impl From<Middleware> for Reply {
    fn from(entry: Middleware) -> Self { Self::Entry(entry) }
}

// ── Closure adapters ──────────────────────────────────────────────────────────

/// Handler built from a synchronous closure. See [`sync`].
pub struct SyncFn<F>(F);

/// Turns a plain closure into a [`Handler`].
///
/// ```rust
/// use arbor::{Middleware, handler};
///
/// let hello = Middleware::leaf(handler::sync(|tx| {
///     tx.response_mut().write("hello ");
///     Ok("world")
/// }));
/// ```
pub fn sync<F, R>(f: F) -> SyncFn<F>
where
    F: Fn(&mut Transaction) -> Result<R, Error> + Send + Sync + 'static,
    R: Into<Reply>,
{
    SyncFn(f)
}

impl<F, R> Handler for SyncFn<F>
where
    F: Fn(&mut Transaction) -> Result<R, Error> + Send + Sync + 'static,
    R: Into<Reply>,
{
    fn call<'a>(&'a self, tx: &'a mut Transaction) -> BoxFuture<'a, Result<Reply, Error>> {
        future::ready((self.0)(tx).map(Into::into)).boxed()
    }
}

/// Handler built from an async closure. See [`from_fn`].
pub struct AsyncFn<F>(F);

/// Turns a closure returning a boxed future into a [`Handler`].
///
/// The future may hold on to the transaction across `.await` points:
///
/// ```rust
/// use arbor::{Middleware, Reply, handler};
///
/// let slow = Middleware::leaf(handler::from_fn(|tx| Box::pin(async move {
///     tokio::task::yield_now().await;
///     tx.response_mut().write("done");
///     Ok(Reply::Continue)
/// })));
/// ```
pub fn from_fn<F>(f: F) -> AsyncFn<F>
where
    F: for<'a> Fn(&'a mut Transaction) -> BoxFuture<'a, Result<Reply, Error>> + Send + Sync + 'static,
{
    AsyncFn(f)
}

impl<F> Handler for AsyncFn<F>
where
    F: for<'a> Fn(&'a mut Transaction) -> BoxFuture<'a, Result<Reply, Error>> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, tx: &'a mut Transaction) -> BoxFuture<'a, Result<Reply, Error>> {
        (self.0)(tx)
    }
}
