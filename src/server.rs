//! HTTP server and graceful shutdown.
//!
//! The server is a thin transport around [`Registry::complete`]: it reads
//! each request body in full, walks the registry's tree, and writes back the
//! response the walk produced.
//!
//! # Disconnects
//!
//! Each walk runs on its own task. When the peer goes away hyper drops the
//! service future, which closes the transaction's response through its
//! [`CloseHandle`]. The step in flight runs to completion with its writes
//! discarded, and the walk stops before the next step.
//!
//! # Graceful shutdown
//!
//! On SIGTERM or Ctrl-C the server:
//! 1. Immediately stops `listener.accept()`, so no new connections are made.
//! 2. Lets every in-flight connection task run to completion.
//! 3. Returns from [`Server::serve`], which lets `main` exit cleanly.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::error::Error;
use crate::registry::Registry;
use crate::request::Request;
use crate::response::{CloseHandle, Response};
use crate::transaction::Transaction;

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// ```rust
    /// use arbor::Server;
    /// let server = Server::bind("0.0.0.0:3000").unwrap();
    /// assert!(Server::bind("not an address").is_err());
    /// ```
    pub fn bind(addr: &str) -> Result<Self, Error> {
        let addr = addr.parse::<SocketAddr>().map_err(|_| Error::Addr(addr.to_owned()))?;
        Ok(Self { addr })
    }

    /// Freezes `registry`, then accepts connections and dispatches them
    /// through it.
    ///
    /// Returns only after a full graceful shutdown (SIGTERM or Ctrl-C,
    /// followed by all in-flight requests completing).
    pub async fn serve(self, registry: Registry) -> Result<(), Error> {
        self.serve_with_shutdown(registry, shutdown_signal()).await
    }

    /// Like [`serve`](Server::serve), but shuts down when `signal` resolves.
    pub async fn serve_with_shutdown(
        self,
        mut registry: Registry,
        signal: impl Future<Output = ()>,
    ) -> Result<(), Error> {
        registry.freeze();
        let listener = TcpListener::bind(self.addr).await?;

        // Shared read-only across every connection task.
        let registry = Arc::new(registry);

        info!(addr = %self.addr, "arbor listening");

        let mut tasks = tokio::task::JoinSet::new();

        let shutdown = signal;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Check shutdown first so a signal stops accepting at once,
                // even if more connections are queued.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let registry = Arc::clone(&registry);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // Called once per request on the connection.
                        let svc = service_fn(move |req| {
                            let registry = Arc::clone(&registry);
                            async move { dispatch(registry, req, remote_addr).await }
                        });

                        // HTTP/1.1 or HTTP/2, whichever the client negotiates.
                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connection tasks.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("arbor stopped");
        Ok(())
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Reads one request, walks the tree, returns one response.
///
/// Infallible towards hyper: a body that cannot be read is answered with
/// `400` before any transaction exists, everything else is decided by the
/// walk.
async fn dispatch(
    registry: Arc<Registry>,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let span = info_span!("request", method = %parts.method, path = %parts.uri.path(), peer = %remote_addr);

    async move {
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                let err = Error::from(e);
                warn!(error = %err, "rejecting request");
                return Ok(page(err.status()).into_http());
            }
        };

        let tx = Transaction::new(Request::from_parts(parts, body));
        let _hang_up = HangUp(tx.response().close_handle());

        let walk = tokio::spawn(async move { registry.complete(tx).await }.in_current_span());
        let response = match walk.await {
            Ok(response) => response,
            Err(e) => {
                error!("request task failed: {e}");
                page(StatusCode::INTERNAL_SERVER_ERROR)
            }
        };

        debug!(status = ?response.status(), bytes = response.body().len(), "request resolved");
        Ok(response.into_http())
    }
    .instrument(span)
    .await
}

/// Closes the response when dropped, including when hyper abandons the
/// request future because the peer disconnected.
struct HangUp(CloseHandle);

impl Drop for HangUp {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// A bare page carrying `status` and its reason phrase.
fn page(status: StatusCode) -> Response {
    let mut response = Response::new();
    response.set_status(status).send(status.canonical_reason().unwrap_or_default());
    response
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives: SIGTERM or
/// SIGINT on Unix, Ctrl-C elsewhere.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let sigterm = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
