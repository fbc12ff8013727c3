//! Middleware tree entries and the built-in middleware.
//!
//! A tree is built once at startup from [`Middleware`] values and walked per
//! request by the [resolver](crate::resolve). Every entry is exactly one of
//! the variants below; lists nest as branches.
//!
//! Built-in middleware are ordinary handlers:
//! - [`PathRouter`]: literal/regex path matching with subpath scoping
//! - [`MethodFilter`]: literal/regex method matching
//! - [`Negotiate`]: `Accept-Encoding` negotiation
//! - [`status_page`]: an error handler answering with the error's status

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use http::StatusCode;

use crate::error::Error;
use crate::flow::Flow;
use crate::handler::{self, Handler};

mod method;
mod negotiate;
pub(crate) mod path;
mod pattern;

pub use method::MethodFilter;
pub use negotiate::{Encoding, Negotiate, Preference, QualityValues, choose_encoding, parse_quality_values};
pub use path::PathRouter;
pub use pattern::Pattern;

/// A future producing a tree entry, shared so every request awaiting it
/// observes the same result.
pub type PendingEntry = Shared<BoxFuture<'static, Middleware>>;

/// One entry of a middleware tree.
#[derive(Clone)]
pub enum Middleware {
    /// A handler invoked with the transaction.
    Leaf(Arc<dyn Handler>),
    /// Child entries walked left to right.
    Branch(Arc<[Middleware]>),
    /// A handler that only runs while the transaction carries an error.
    /// Completing without an error clears it.
    ErrorHandler(Arc<dyn Handler>),
    Flow(Flow),
    /// Ends the response with this status.
    Status(i64),
    /// Sends this body and ends the response.
    Body(Bytes),
    /// An entry that is not known yet.
    Pending(PendingEntry),
}

impl Middleware {
    pub fn leaf(handler: impl Handler) -> Self {
        Self::Leaf(Arc::new(handler))
    }

    pub fn error_handler(handler: impl Handler) -> Self {
        Self::ErrorHandler(Arc::new(handler))
    }

    pub fn branch(entries: impl IntoIterator<Item = Middleware>) -> Self {
        Self::Branch(entries.into_iter().collect())
    }

    pub fn status(code: impl Into<i64>) -> Self {
        Self::Status(code.into())
    }

    pub fn body(body: impl Into<Bytes>) -> Self {
        Self::Body(body.into())
    }

    /// An entry produced by `fut`, resolved the first time a walk reaches it.
    pub fn pending<F>(fut: F) -> Self
    where
        F: Future<Output = Middleware> + Send + 'static,
    {
        Self::Pending(fut.boxed().shared())
    }

    pub fn is_error_handler(&self) -> bool {
        matches!(self, Self::ErrorHandler(_))
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leaf(_)          => f.write_str("Leaf"),
            Self::Branch(entries)  => f.debug_tuple("Branch").field(&entries.len()).finish(),
            Self::ErrorHandler(_)  => f.write_str("ErrorHandler"),
            Self::Flow(flow)       => f.debug_tuple("Flow").field(flow).finish(),
            Self::Status(code)     => f.debug_tuple("Status").field(code).finish(),
            Self::Body(body)       => f.debug_tuple("Body").field(&body.len()).finish(),
            Self::Pending(_)       => f.write_str("Pending"),
        }
    }
}

impl From<Flow> for Middleware {
    fn from(flow: Flow) -> Self { Self::Flow(flow) }
}

impl From<StatusCode> for Middleware {
    fn from(status: StatusCode) -> Self { Self::Status(status.as_u16().into()) }
}

impl From<&'static str> for Middleware {
    fn from(body: &'static str) -> Self { Self::Body(Bytes::from_static(body.as_bytes())) }
}

impl From<String> for Middleware {
    fn from(body: String) -> Self { Self::Body(body.into()) }
}

impl From<Bytes> for Middleware {
    fn from(body: Bytes) -> Self { Self::Body(body) }
}

impl From<Vec<Middleware>> for Middleware {
    fn from(entries: Vec<Middleware>) -> Self { Self::Branch(entries.into()) }
}

/// Any handler placed in a tree is a `Leaf`.
impl<H: Handler> From<H> for Middleware {
    fn from(handler: H) -> Self { Self::leaf(handler) }
}

/// Builds a [`Middleware::Branch`] from anything convertible into an entry.
///
/// ```rust
/// use arbor::{Flow, Middleware, branch};
/// use arbor::middleware::PathRouter;
///
/// let tree = branch![
///     PathRouter::subpath("/api"),
///     branch![PathRouter::new("/ping"), "pong"],
///     Flow::Continue,
/// ];
/// assert!(matches!(tree, Middleware::Branch(_)));
/// ```
#[macro_export]
macro_rules! branch {
    ($($entry:expr),* $(,)?) => {
        $crate::Middleware::branch(::std::vec![$($crate::Middleware::from($entry)),*])
    };
}

/// An error handler that answers with [`Error::status`] and its reason
/// phrase, hiding the error itself.
pub fn status_page() -> Middleware {
    Middleware::error_handler(handler::sync(|tx| {
        let status = tx.error().map_or(StatusCode::INTERNAL_SERVER_ERROR, Error::status);
        tx.response_mut().set_status(status);
        Ok(status.canonical_reason().unwrap_or("Error"))
    }))
}
