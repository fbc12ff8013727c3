//! Minimal arbor example: a routed JSON API, content negotiation and an
//! error page.
//!
//! Run with:
//!   RUST_LOG=arbor=debug,info cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:3000/api/v1/users/42
//!   curl -i -X POST http://localhost:3000/api/v1/users -d '{"name":"alice"}'
//!   curl -i http://localhost:3000/api/v1/users/0
//!   curl -i -H 'accept-encoding: gzip;q=0, *;q=0' http://localhost:3000/api/v1/users/42
//!   curl -i http://localhost:3000/nowhere

use arbor::middleware::{MethodFilter, Negotiate, PathRouter, Pattern, status_page};
use arbor::{ContentType, Error, Flow, Reply, Registry, Server, Transaction, branch, handler};
use futures::future::BoxFuture;
use http::{Method, StatusCode};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let users = branch![
        PathRouter::subpath("/users"),
        branch![
            MethodFilter::new(Method::GET),
            PathRouter::new(Pattern::regex(r"^/(?P<id>\d+)")?),
            handler::from_fn(get_user),
        ],
        branch![MethodFilter::new(Method::POST), PathRouter::new("/"), handler::sync(create_user)],
        // Anything else under /users is claimed here.
        StatusCode::METHOD_NOT_ALLOWED,
    ];

    let mut app = Registry::new();
    app.mount(Negotiate)?
        .mount(branch![PathRouter::subpath("/api"), branch![PathRouter::subpath("/v1"), users]])?
        .mount(branch![PathRouter::new("/"), "arbor says hi"])?
        .replace_error_handlers([status_page()])?;

    Server::bind("0.0.0.0:3000")?.serve(app).await
}

// GET /api/v1/users/:id
//
// Async handlers borrow the transaction across awaits; user 0 does not exist
// and travels the error chain to the status page.
fn get_user(tx: &mut Transaction) -> BoxFuture<'_, Result<Reply, Error>> {
    Box::pin(async move {
        let id: u64 = tx.param("id").unwrap_or_default().parse().map_err(Error::handler)?;
        tokio::task::yield_now().await;
        if id == 0 {
            return Err(Error::handler("user 0 does not exist"));
        }

        tx.response_mut().content_type(ContentType::Json);
        Ok(format!(r#"{{"id":{id},"name":"alice"}}"#).into())
    })
}

// POST /api/v1/users
fn create_user(tx: &mut Transaction) -> Result<Flow, Error> {
    if tx.request().body().is_empty() {
        tx.response_mut().set_status(StatusCode::BAD_REQUEST).send("missing body");
        return Ok(Flow::End);
    }

    tx.response_mut()
        .set_status(StatusCode::CREATED)
        .content_type(ContentType::Json)
        .header("location", "/api/v1/users/99")?
        .send(r#"{"id":99,"name":"new_user"}"#);
    Ok(Flow::End)
}
