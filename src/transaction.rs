//! Per-request context threaded through every middleware.

use http::{Extensions, StatusCode};
use tracing::warn;

use crate::error::Error;
use crate::flow::Flow;
use crate::middleware::path::{self, PathLedger};
use crate::request::Request;
use crate::response::Response;

/// Whether the walk is carrying an error.
#[derive(Debug, Default)]
pub enum TxState {
    #[default]
    Normal,
    /// Ordinary entries are skipped until an error handler completes.
    Error(Error),
}

/// The mutable state of one request's walk through the middleware tree.
///
/// Owned by exactly one walk; never shared between requests.
#[derive(Debug)]
pub struct Transaction {
    request: Request,
    response: Response,
    locals: Extensions,
    state: TxState,
    in_error_handlers: bool,
    /// One slot per branch currently being walked, holding the child index.
    pub(crate) tree_index: Vec<usize>,
    pub(crate) path: PathLedger,
}

impl Transaction {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            response: Response::new(),
            locals: Extensions::new(),
            state: TxState::Normal,
            in_error_handlers: false,
            tree_index: Vec::new(),
            path: PathLedger::default(),
        }
    }

    pub fn request(&self) -> &Request { &self.request }
    pub fn response(&self) -> &Response { &self.response }
    pub fn response_mut(&mut self) -> &mut Response { &mut self.response }

    /// Typed scratch space for handlers to pass values down the tree.
    ///
    /// ```rust
    /// # use arbor::Transaction;
    /// # use bytes::Bytes;
    /// # let mut tx = Transaction::new(http::Request::get("/").body(Bytes::new()).unwrap().into());
    /// #[derive(Clone)]
    /// struct UserId(u64);
    ///
    /// tx.locals_mut().insert(UserId(7));
    /// assert_eq!(tx.locals().get::<UserId>().map(|u| u.0), Some(7));
    /// ```
    pub fn locals(&self) -> &Extensions { &self.locals }
    pub fn locals_mut(&mut self) -> &mut Extensions { &mut self.locals }

    pub fn state(&self) -> &TxState { &self.state }

    pub fn error(&self) -> Option<&Error> {
        match &self.state {
            TxState::Normal => None,
            TxState::Error(err) => Some(err),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.state, TxState::Error(_))
    }

    /// Whether the walk has reached the registry's error-handler collection.
    pub fn is_error_handler_state(&self) -> bool {
        self.in_error_handlers
    }

    /// Current position in the tree, outermost branch first.
    pub fn tree_index(&self) -> &[usize] {
        &self.tree_index
    }

    /// The base path established by the enclosing subpath routers.
    pub fn base_path(&self) -> String {
        self.path.base(&self.tree_index)
    }

    /// The accumulated base as of the most recent router match, even if
    /// the walk has since left that router's branch.
    pub fn current_path(&self) -> &str {
        self.path.current()
    }

    /// The request path relative to [`base_path`](Self::base_path).
    pub fn relative_path(&self) -> String {
        path::relative(self.request.path(), &self.base_path())
    }

    /// A named path parameter captured by an enclosing regex path router.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.path.param(&self.tree_index, name)
    }

    pub fn into_response(self) -> Response {
        self.response
    }

    pub(crate) fn fail(&mut self, err: Error) {
        self.state = TxState::Error(err);
    }

    pub(crate) fn recover(&mut self) -> Option<Error> {
        match std::mem::take(&mut self.state) {
            TxState::Normal => None,
            TxState::Error(err) => Some(err),
        }
    }

    pub(crate) fn enter_error_handlers(&mut self) {
        self.in_error_handlers = true;
    }

    /// Completes the response after the walk returned `flow`.
    ///
    /// `END` means the response is already produced. Otherwise a leftover
    /// error becomes a bare `500`, a partially written response is ended
    /// as is, and an untouched one becomes `404`.
    pub fn finalize(&mut self, flow: Flow) {
        if flow == Flow::End {
            return;
        }

        if let Some(err) = self.recover() {
            warn!(error = %err, path = %self.request.path(), "unhandled error");
            self.response.reset();
            respond(&mut self.response, StatusCode::INTERNAL_SERVER_ERROR);
            return;
        }

        if self.response.is_ended() {
            return;
        }
        if self.response.status().is_none() && self.response.body().is_empty() {
            respond(&mut self.response, StatusCode::NOT_FOUND);
        } else {
            self.response.end();
        }
    }
}

fn respond(response: &mut Response, status: StatusCode) {
    response
        .set_status(status)
        .send(status.canonical_reason().unwrap_or_default());
}
