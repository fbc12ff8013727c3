//! The application's middleware tree and terminal error handlers.
//!
//! Built once at startup, frozen, then shared read-only by every request.

use std::sync::Arc;

use tracing::debug;

use crate::error::Error;
use crate::flow::Flow;
use crate::handler::Handler;
use crate::middleware::Middleware;
use crate::request::Request;
use crate::resolver;
use crate::response::Response;
use crate::transaction::Transaction;

/// The root handler tree plus the error-handler collection walked after it.
///
/// Every mutator fails with [`Error::Frozen`] once [`freeze`](Self::freeze)
/// has been called. [`Server::serve`](crate::Server::serve) freezes the
/// registry before it accepts the first connection.
///
/// ```rust
/// use arbor::{Registry, branch};
/// use arbor::middleware::{PathRouter, status_page};
///
/// # fn main() -> Result<(), arbor::Error> {
/// let mut app = Registry::new();
/// app.mount(branch![PathRouter::new("/ping"), "pong"])?
///    .replace_error_handlers([status_page()])?;
/// app.freeze();
/// assert!(app.mount("late").is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Registry {
    root: Arc<[Middleware]>,
    errors: Arc<[Middleware]>,
    frozen: bool,
}

impl Registry {
    pub fn new() -> Self {
        Self { root: Arc::new([]), errors: Arc::new([]), frozen: false }
    }

    /// Appends an entry to the root branch.
    pub fn mount(&mut self, entry: impl Into<Middleware>) -> Result<&mut Self, Error> {
        self.check()?;
        self.root = append(&self.root, entry.into());
        Ok(self)
    }

    pub fn replace_root(
        &mut self,
        entries: impl IntoIterator<Item = Middleware>,
    ) -> Result<&mut Self, Error> {
        self.check()?;
        self.root = entries.into_iter().collect();
        Ok(self)
    }

    /// Appends an error handler to the terminal collection.
    pub fn catch(&mut self, handler: impl Handler) -> Result<&mut Self, Error> {
        self.check()?;
        self.errors = append(&self.errors, Middleware::error_handler(handler));
        Ok(self)
    }

    pub fn replace_error_handlers(
        &mut self,
        entries: impl IntoIterator<Item = Middleware>,
    ) -> Result<&mut Self, Error> {
        self.check()?;
        self.errors = entries.into_iter().collect();
        Ok(self)
    }

    /// Ends the setup phase. Idempotent.
    pub fn freeze(&mut self) {
        if !self.frozen {
            debug!(root = self.root.len(), error_handlers = self.errors.len(), "registry frozen");
        }
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Walks the root tree, then the error handlers, against `tx`.
    pub async fn resolve(&self, tx: &mut Transaction) -> Flow {
        let root = Middleware::Branch(Arc::clone(&self.root));
        resolver::resolve_with_fallback(tx, &root, &self.errors).await
    }

    /// Resolves one request start to finish and returns the final response.
    pub async fn handle(&self, request: Request) -> Response {
        self.complete(Transaction::new(request)).await
    }

    /// Like [`handle`](Self::handle), for a transaction the caller already
    /// holds on to, e.g. to take its response's
    /// [`close_handle`](crate::Response::close_handle) first.
    pub async fn complete(&self, mut tx: Transaction) -> Response {
        let flow = self.resolve(&mut tx).await;
        tx.finalize(flow);
        tx.into_response()
    }

    fn check(&self) -> Result<(), Error> {
        if self.frozen { Err(Error::Frozen) } else { Ok(()) }
    }
}

impl Default for Registry {
    fn default() -> Self { Self::new() }
}

fn append(entries: &Arc<[Middleware]>, entry: Middleware) -> Arc<[Middleware]> {
    entries.iter().cloned().chain([entry]).collect()
}
