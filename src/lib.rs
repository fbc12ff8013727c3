//! # arbor
//!
//! An HTTP framework where the application is a tree of middleware.
//!
//! ## The model
//!
//! Every request gets a [`Transaction`] and a walk over one shared tree.
//! Entries run depth-first, left to right, and each one answers with a
//! [`Flow`]:
//!
//! - `CONTINUE`: on to the next sibling
//! - `BREAK`: leave the enclosing branch, the parent carries on
//! - `END`: the response is done, stop everything
//!
//! A handler error puts the transaction into an error state. From then on
//! ordinary entries are skipped until an error handler at some enclosing
//! level claims the error; whatever is left unclaimed becomes a bare `500`.
//!
//! Routing is just more tree: [`PathRouter`](middleware::PathRouter) and
//! [`MethodFilter`](middleware::MethodFilter) break out of their branch when
//! they do not match, and subpath routers scope the rest of their branch
//! under the segment they consumed.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use arbor::{Flow, Registry, Server, branch, handler};
//! use arbor::middleware::{MethodFilter, Negotiate, PathRouter, Pattern, status_page};
//! use http::Method;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), arbor::Error> {
//!     let mut app = Registry::new();
//!     app.mount(Negotiate)?
//!        .mount(branch![
//!            PathRouter::subpath("/users"),
//!            branch![
//!                MethodFilter::new(Method::GET),
//!                PathRouter::new(Pattern::regex(r"^/(?P<id>\d+)")?),
//!                handler::sync(|tx| Ok(format!("user {}", tx.param("id").unwrap_or("?")))),
//!            ],
//!            branch![MethodFilter::new(Method::POST), http::StatusCode::CREATED],
//!            Flow::End,
//!        ])?
//!        .replace_error_handlers([status_page()])?;
//!
//!     Server::bind("0.0.0.0:3000")?.serve(app).await
//! }
//! ```

mod error;
mod flow;
mod registry;
mod request;
mod resolver;
mod response;
mod server;
mod transaction;

pub mod handler;
pub mod middleware;

pub use error::{BoxError, Error};
pub use flow::Flow;
pub use handler::{Handler, Reply};
pub use middleware::Middleware;
pub use registry::Registry;
pub use request::Request;
pub use resolver::resolve;
pub use response::{CloseHandle, ContentType, Response};
pub use server::Server;
pub use transaction::{Transaction, TxState};
