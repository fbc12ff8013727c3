//! Unified error type.

use http::StatusCode;
use http::header::{InvalidHeaderName, InvalidHeaderValue};

/// Boxed error raised by application handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type returned by arbor's fallible operations.
///
/// Handler-raised errors travel through the middleware tree as the
/// [`Transaction`](crate::Transaction)'s error state until an error handler
/// claims them. The remaining variants surface infrastructure failures and
/// misuse of the flow-control vocabulary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid socket address `{0}`")]
    Addr(String),

    /// The request body could not be read off the connection.
    #[error("malformed request: {0}")]
    Body(#[from] hyper::Error),

    /// A handler or tree entry asked for a status code HTTP cannot express.
    #[error("invalid status code {0}")]
    InvalidStatus(i64),

    /// Content negotiation found no encoding the client accepts.
    #[error("no acceptable content encoding")]
    NotAcceptable,

    /// A regex path or method pattern failed to compile.
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// The registry was mutated after `freeze()`.
    #[error("registry is frozen")]
    Frozen,

    #[error("invalid header: {0}")]
    Header(#[from] http::Error),

    #[error(transparent)]
    Handler(BoxError),
}

impl Error {
    /// Wraps an application error, or a plain message, raised by a handler.
    ///
    /// ```rust
    /// use arbor::Error;
    ///
    /// let err = Error::handler("database unavailable");
    /// assert_eq!(err.to_string(), "database unavailable");
    /// ```
    pub fn handler(err: impl Into<BoxError>) -> Self {
        Self::Handler(err.into())
    }

    /// The status an error page for this error should carry.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Body(_) => StatusCode::BAD_REQUEST,
            Self::NotAcceptable => StatusCode::NOT_ACCEPTABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<InvalidHeaderName> for Error {
    fn from(e: InvalidHeaderName) -> Self {
        Self::Header(e.into())
    }
}

impl From<InvalidHeaderValue> for Error {
    fn from(e: InvalidHeaderValue) -> Self {
        Self::Header(e.into())
    }
}
