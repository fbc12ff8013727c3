//! Outgoing HTTP response, built up in place while the tree is walked.
//!
//! Handlers do not return a response; they write into the one owned by the
//! [`Transaction`](crate::Transaction). Writes happen in tree order, and
//! every write after [`Response::end`] (or after the transport closed) is a
//! silent no-op.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;

use crate::error::Error;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for use with [`Response::content_type`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentType {
    Csv,          // text/csv
    EventStream,  // text/event-stream  (SSE)
    Html,         // text/html; charset=utf-8
    Json,         // application/json
    OctetStream,  // application/octet-stream
    Text,         // text/plain; charset=utf-8
    Xml,          // application/xml
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Csv         => "text/csv",
            Self::EventStream => "text/event-stream",
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Xml         => "application/xml",
        }
    }
}

// ── CloseHandle ───────────────────────────────────────────────────────────────

/// Shared flag the transport flips when the peer has gone away.
///
/// Cloning is cheap; every clone observes the same flag.
#[derive(Clone, Debug, Default)]
pub struct CloseHandle(Arc<AtomicBool>);

impl CloseHandle {
    pub fn close(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response under construction.
///
/// ```rust
/// use arbor::{ContentType, Response};
/// use http::StatusCode;
///
/// let mut res = Response::new();
/// res.set_status(StatusCode::CREATED);
/// res.content_type(ContentType::Json);
/// res.send(r#"{"id":42}"#);
/// assert!(res.is_ended());
/// ```
#[derive(Debug, Default)]
pub struct Response {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: BytesMut,
    ended: bool,
    closed: CloseHandle,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    /// The explicitly set status, if any.
    pub fn status(&self) -> Option<StatusCode> { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn is_ended(&self) -> bool { self.ended }
    pub fn is_closed(&self) -> bool { self.closed.is_closed() }

    /// Whether writes still land. False once ended or closed.
    pub fn is_writable(&self) -> bool {
        !self.ended && !self.is_closed()
    }

    /// A handle the transport uses to mark this response undeliverable.
    pub fn close_handle(&self) -> CloseHandle {
        self.closed.clone()
    }

    pub fn set_status(&mut self, status: StatusCode) -> &mut Self {
        if self.is_writable() {
            self.status = Some(status);
        }
        self
    }

    /// Sets a header, replacing any previous values under the same name.
    pub fn header(&mut self, name: &str, value: &str) -> Result<&mut Self, Error> {
        let name = HeaderName::from_bytes(name.as_bytes())?;
        let value = HeaderValue::from_str(value)?;
        if self.is_writable() {
            self.headers.insert(name, value);
        }
        Ok(self)
    }

    /// Adds a header value without touching existing ones.
    pub fn append_header(&mut self, name: &str, value: &str) -> Result<&mut Self, Error> {
        let name = HeaderName::from_bytes(name.as_bytes())?;
        let value = HeaderValue::from_str(value)?;
        if self.is_writable() {
            self.headers.append(name, value);
        }
        Ok(self)
    }

    pub fn content_type(&mut self, content_type: ContentType) -> &mut Self {
        if self.is_writable() {
            self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type.as_str()));
        }
        self
    }

    /// Appends to the body without ending the response.
    pub fn write(&mut self, chunk: impl AsRef<[u8]>) -> &mut Self {
        if self.is_writable() {
            self.body.extend_from_slice(chunk.as_ref());
        }
        self
    }

    /// Writes `body` and ends the response.
    ///
    /// Without an explicit status, a non-empty body is sent as `200 OK` and
    /// an empty one as `204 No Content`.
    pub fn send(&mut self, body: impl Into<Bytes>) -> &mut Self {
        let body = body.into();
        if self.is_writable() && self.status.is_none() {
            self.status = Some(if body.is_empty() && self.body.is_empty() {
                StatusCode::NO_CONTENT
            } else {
                StatusCode::OK
            });
        }
        self.write(body);
        self.end()
    }

    /// Marks the response as fully produced.
    pub fn end(&mut self) -> &mut Self {
        self.ended = true;
        self
    }

    /// Drops everything written so far. Used to substitute a failure page.
    pub(crate) fn reset(&mut self) {
        self.status = None;
        self.headers.clear();
        self.body.clear();
        self.ended = false;
    }

    /// Converts into the hyper response handed back to the connection.
    pub fn into_http(self) -> http::Response<Full<Bytes>> {
        let mut res = http::Response::new(Full::new(self.body.freeze()));
        *res.status_mut() = self.status.unwrap_or(StatusCode::OK);
        *res.headers_mut() = self.headers;
        res
    }
}
