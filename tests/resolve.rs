//! Control flow, error handling and routing through the resolver.

use std::sync::{Arc, Mutex};

use arbor::middleware::{Encoding, MethodFilter, Negotiate, PathRouter, Pattern, status_page};
use arbor::{
    Error, Flow, Middleware, Registry, Reply, Request, Transaction, branch, handler, resolve,
};
use bytes::Bytes;
use http::{Method, StatusCode};

// ── Helpers ───────────────────────────────────────────────────────────────────

type Log = Arc<Mutex<Vec<String>>>;

fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn request(method: Method, path: &str) -> Request {
    http::Request::builder()
        .method(method)
        .uri(path)
        .body(Bytes::new())
        .unwrap()
        .into()
}

fn new_tx(method: Method, path: &str) -> Transaction {
    Transaction::new(request(method, path))
}

/// A leaf that records `name` and continues.
fn mark(log: &Log, name: &'static str) -> Middleware {
    let log = Arc::clone(log);
    Middleware::leaf(handler::sync(move |_tx| {
        log.lock().unwrap().push(name.to_owned());
        Ok(())
    }))
}

/// A leaf that records where it ran: base and relative path.
fn probe(log: &Log, name: &'static str) -> Middleware {
    let log = Arc::clone(log);
    Middleware::leaf(handler::sync(move |tx| {
        let line = format!("{name} base={} rel={}", tx.base_path(), tx.relative_path());
        log.lock().unwrap().push(line);
        Ok(())
    }))
}

fn fail(message: &'static str) -> Middleware {
    Middleware::leaf(handler::sync(move |_tx| Err::<(), _>(Error::handler(message))))
}

/// An error handler that records the error and clears it.
fn catch(log: &Log) -> Middleware {
    let log = Arc::clone(log);
    Middleware::error_handler(handler::sync(move |tx| {
        let message = tx.error().map(ToString::to_string).unwrap_or_default();
        log.lock().unwrap().push(format!("caught {message}"));
        Ok(())
    }))
}

// ── Flow signals ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn break_stays_inside_its_branch() {
    let log = new_log();
    let tree = branch![
        mark(&log, "a"),
        branch![
            mark(&log, "b"),
            branch![Flow::Break, mark(&log, "never")],
            mark(&log, "c"),
        ],
        mark(&log, "d"),
    ];

    let mut tx = new_tx(Method::GET, "/");
    let flow = resolve(&mut tx, &tree).await;

    assert_eq!(flow, Flow::Continue);
    assert_eq!(entries(&log), ["a", "b", "c", "d"]);
}

#[tokio::test]
async fn end_stops_the_whole_walk() {
    let log = new_log();
    let tree = branch![
        branch![
            mark(&log, "a"),
            branch![mark(&log, "b"), Flow::End, mark(&log, "never")],
            mark(&log, "never"),
        ],
        mark(&log, "never"),
    ];

    let mut tx = new_tx(Method::GET, "/");
    let flow = resolve(&mut tx, &tree).await;

    assert_eq!(flow, Flow::End);
    assert_eq!(entries(&log), ["a", "b"]);
    assert!(tx.tree_index().is_empty());
}

#[tokio::test]
async fn break_escapes_only_from_a_bare_entry() {
    let mut tx = new_tx(Method::GET, "/");
    assert_eq!(resolve(&mut tx, &Flow::Break.into()).await, Flow::Break);
    assert_eq!(resolve(&mut tx, &branch![Flow::Break]).await, Flow::Continue);
}

#[tokio::test]
async fn tree_index_tracks_nesting() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = {
        let seen = Arc::clone(&seen);
        handler::sync(move |tx| {
            seen.lock().unwrap().push(tx.tree_index().to_vec());
            Ok(())
        })
    };
    let record = Middleware::leaf(record);
    let tree = branch![
        record.clone(),
        branch![Flow::Continue, branch![record.clone()]],
        record,
    ];

    let mut tx = new_tx(Method::GET, "/");
    resolve(&mut tx, &tree).await;

    assert_eq!(*seen.lock().unwrap(), [vec![0], vec![1, 1, 0], vec![2]]);
    assert!(tx.tree_index().is_empty());
}

#[tokio::test]
async fn status_and_body_entries_end_the_response() {
    let mut tx = new_tx(Method::GET, "/");
    let flow = resolve(&mut tx, &branch![StatusCode::ACCEPTED, "never"]).await;
    assert_eq!(flow, Flow::End);
    assert_eq!(tx.response().status(), Some(StatusCode::ACCEPTED));
    assert!(tx.response().body().is_empty());

    let mut tx = new_tx(Method::GET, "/");
    resolve(&mut tx, &branch!["hello"]).await;
    assert_eq!(tx.response().status(), Some(StatusCode::OK));
    assert_eq!(tx.response().body(), b"hello");

    let mut tx = new_tx(Method::GET, "/");
    resolve(&mut tx, &branch![Bytes::new()]).await;
    assert_eq!(tx.response().status(), Some(StatusCode::NO_CONTENT));
}

#[tokio::test]
async fn returned_list_is_a_body_not_a_branch() {
    let log = new_log();
    let chunks = Middleware::leaf(handler::sync(|_tx| {
        Ok(vec![Bytes::from_static(b"one,"), Bytes::from_static(b"two")])
    }));
    let tree = branch![chunks, mark(&log, "never")];

    let mut tx = new_tx(Method::GET, "/");
    assert_eq!(resolve(&mut tx, &tree).await, Flow::End);
    assert_eq!(tx.response().body(), b"one,two");
    assert!(entries(&log).is_empty());

    // A returned entry, by contrast, is resolved like a tree entry.
    let nested = {
        let inner = branch![mark(&log, "inner"), Flow::Break, mark(&log, "never")];
        Middleware::leaf(handler::sync(move |_tx| Ok(inner.clone())))
    };
    let mut tx = new_tx(Method::GET, "/");
    assert_eq!(resolve(&mut tx, &branch![nested, mark(&log, "after")]).await, Flow::Continue);
    assert_eq!(entries(&log), ["inner", "after"]);
}

#[tokio::test]
async fn async_leaves_run_in_tree_order() {
    let slow = Middleware::leaf(handler::from_fn(|tx| {
        Box::pin(async move {
            tokio::task::yield_now().await;
            tx.response_mut().write("1");
            Ok(Reply::Continue)
        })
    }));
    let pending = Middleware::leaf(handler::sync(|_tx| {
        Ok(Reply::pending(async {
            tokio::task::yield_now().await;
            Ok::<_, Error>(Flow::Continue)
        }))
    }));
    let fast = Middleware::leaf(handler::sync(|tx| {
        tx.response_mut().write("2");
        Ok(())
    }));

    let mut tx = new_tx(Method::GET, "/");
    resolve(&mut tx, &branch![slow, pending, fast]).await;
    assert_eq!(tx.response().body(), b"12");
}

#[tokio::test]
async fn pending_entries_resolve_to_entries() {
    let log = new_log();
    let later = {
        let log = Arc::clone(&log);
        Middleware::pending(async move {
            tokio::task::yield_now().await;
            branch![mark(&log, "late"), "done"]
        })
    };

    // Shared: every walk observes the same resolved entry.
    for _ in 0..2 {
        let mut tx = new_tx(Method::GET, "/");
        assert_eq!(resolve(&mut tx, &later).await, Flow::End);
        assert_eq!(tx.response().body(), b"done");
    }
    assert_eq!(entries(&log), ["late", "late"]);
}

#[tokio::test]
async fn closed_response_stops_the_walk() {
    let log = new_log();
    let hang_up = Middleware::leaf(handler::sync(|tx| {
        tx.response().close_handle().close();
        tx.response_mut().write("lost");
        Ok(())
    }));

    let mut tx = new_tx(Method::GET, "/");
    let flow = resolve(&mut tx, &branch![hang_up, mark(&log, "never")]).await;

    assert_eq!(flow, Flow::End);
    assert!(entries(&log).is_empty());
    assert!(tx.response().body().is_empty());
}

// ── Error state ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn errors_skip_leaves_until_handled() {
    let log = new_log();
    let tree = branch![
        branch![
            mark(&log, "a"),
            fail("boom"),
            mark(&log, "never"),
            branch![mark(&log, "never")],
        ],
        mark(&log, "never"),
        catch(&log),
        mark(&log, "b"),
    ];

    let mut tx = new_tx(Method::GET, "/");
    let flow = resolve(&mut tx, &tree).await;

    assert_eq!(flow, Flow::Continue);
    assert_eq!(entries(&log), ["a", "caught boom", "b"]);
    assert!(tx.error().is_none());
}

#[tokio::test]
async fn error_handlers_idle_without_an_error() {
    let log = new_log();
    let mut tx = new_tx(Method::GET, "/");
    resolve(&mut tx, &branch![catch(&log), mark(&log, "a")]).await;
    assert_eq!(entries(&log), ["a"]);
}

#[tokio::test]
async fn handled_error_reaches_the_following_leaf() {
    let log = new_log();
    let handle = Middleware::error_handler(handler::sync(|tx| {
        tx.response_mut()
            .set_status(StatusCode::INTERNAL_SERVER_ERROR)
            .write("handled");
        Ok(())
    }));
    let following = {
        let log = Arc::clone(&log);
        Middleware::leaf(handler::sync(move |tx| {
            log.lock().unwrap().push(format!("following error={}", tx.is_error()));
            Ok(())
        }))
    };

    let mut tx = new_tx(Method::GET, "/");
    let flow = resolve(&mut tx, &branch![fail("boom"), handle, following]).await;
    tx.finalize(flow);

    assert_eq!(entries(&log), ["following error=false"]);
    let res = tx.into_response();
    assert_eq!(res.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    assert_eq!(res.body(), b"handled");
}

#[tokio::test]
async fn every_error_handler_shape_clears_the_error() {
    let sync = Middleware::error_handler(handler::sync(|_tx| Ok(())));
    let asynchronous = Middleware::error_handler(handler::from_fn(|_tx| {
        Box::pin(async {
            tokio::task::yield_now().await;
            Ok(Reply::Continue)
        })
    }));
    let pending = Middleware::error_handler(handler::sync(|_tx| {
        Ok(Reply::pending(async {
            tokio::task::yield_now().await;
            Ok::<_, Error>(())
        }))
    }));

    for recover in [sync, asynchronous, pending] {
        let log = new_log();
        let mut tx = new_tx(Method::GET, "/");
        resolve(&mut tx, &branch![fail("boom"), recover, mark(&log, "after")]).await;
        assert!(tx.error().is_none());
        assert_eq!(entries(&log), ["after"]);
    }
}

#[tokio::test]
async fn rethrowing_keeps_the_error_alive() {
    let log = new_log();
    let rethrow = Middleware::error_handler(handler::sync(|tx| {
        let message = tx.error().map(ToString::to_string).unwrap_or_default();
        Err::<(), _>(Error::handler(format!("wrapped {message}")))
    }));
    let pending_rethrow = Middleware::error_handler(handler::sync(|_tx| {
        Ok(Reply::pending(async { Err::<(), _>(Error::handler("late")) }))
    }));

    let mut tx = new_tx(Method::GET, "/");
    resolve(&mut tx, &branch![fail("boom"), rethrow, mark(&log, "never"), catch(&log)]).await;
    assert_eq!(entries(&log), ["caught wrapped boom"]);

    let log = new_log();
    let mut tx = new_tx(Method::GET, "/");
    resolve(&mut tx, &branch![fail("boom"), pending_rethrow, catch(&log)]).await;
    assert_eq!(entries(&log), ["caught late"]);
}

#[tokio::test]
async fn invalid_status_is_an_error() {
    let log = new_log();
    let negative = Middleware::leaf(handler::sync(|_tx| Ok(Reply::Status(-1))));

    let mut tx = new_tx(Method::GET, "/");
    let flow = resolve(&mut tx, &branch![negative, mark(&log, "never"), catch(&log)]).await;
    assert_eq!(flow, Flow::Continue);
    assert_eq!(entries(&log), ["caught invalid status code -1"]);

    let mut tx = new_tx(Method::GET, "/");
    resolve(&mut tx, &branch![Middleware::status(70_000)]).await;
    assert!(matches!(tx.error(), Some(Error::InvalidStatus(70_000))));
}

#[tokio::test]
async fn handler_reply_after_recovery_follows_leaf_rules() {
    let mut tx = new_tx(Method::GET, "/");
    let flow = resolve(&mut tx, &branch![fail("boom"), status_page(), "never"]).await;

    assert_eq!(flow, Flow::End);
    assert_eq!(tx.response().status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    assert_eq!(tx.response().body(), b"Internal Server Error");
    assert!(tx.error().is_none());
}

// ── Registry ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn registry_error_handlers_run_after_the_tree() {
    let log = new_log();
    let seen_state = {
        let log = Arc::clone(&log);
        handler::sync(move |tx| {
            log.lock().unwrap().push(format!("terminal={}", tx.is_error_handler_state()));
            Ok(())
        })
    };

    let mut app = Registry::new();
    app.mount(branch![branch![fail("deep")], mark(&log, "never")])
        .unwrap()
        .catch(seen_state)
        .unwrap();

    let res = app.handle(request(Method::GET, "/")).await;
    assert_eq!(entries(&log), ["terminal=true"]);
    // Claimed but nothing written: an untouched response is a 404.
    assert_eq!(res.status(), Some(StatusCode::NOT_FOUND));
}

#[tokio::test]
async fn nested_terminal_error_handlers_run() {
    let mut app = Registry::new();
    app.mount(Negotiate)
        .unwrap()
        .replace_error_handlers([branch![status_page()]])
        .unwrap();

    let req = http::Request::get("/")
        .header("accept-encoding", "gzip;q=0, *;q=0")
        .body(Bytes::new())
        .unwrap();
    let res = app.handle(req.into()).await;
    assert_eq!(res.status(), Some(StatusCode::NOT_ACCEPTABLE));
    assert_eq!(res.body(), b"Not Acceptable");
}

#[tokio::test]
async fn terminal_error_handlers_can_be_routed() {
    let log = new_log();
    let api_errors = {
        let log = Arc::clone(&log);
        Middleware::error_handler(handler::sync(move |tx| {
            log.lock().unwrap().push(format!("api rel={}", tx.relative_path()));
            Ok("api error")
        }))
    };

    let mut app = Registry::new();
    app.mount(fail("boom"))
        .unwrap()
        .replace_error_handlers([
            branch![PathRouter::subpath("/api"), api_errors],
            status_page(),
        ])
        .unwrap();

    let res = app.handle(request(Method::GET, "/api/users")).await;
    assert_eq!(entries(&log), ["api rel=/users"]);
    assert_eq!(res.body(), b"api error");

    let res = app.handle(request(Method::GET, "/site")).await;
    assert_eq!(entries(&log), ["api rel=/users"]);
    assert_eq!(res.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
}

#[tokio::test]
async fn terminal_error_handlers_idle_without_an_error() {
    let mut app = Registry::new();
    app.mount(branch![PathRouter::new("/ok"), handler::sync(|tx| {
        tx.response_mut().write("fine");
        Ok(())
    })])
    .unwrap()
    .replace_error_handlers([branch![status_page()]])
    .unwrap();

    let res = app.handle(request(Method::GET, "/ok")).await;
    assert_eq!(res.status(), None);
    assert_eq!(res.body(), b"fine");
}

#[tokio::test]
async fn unclaimed_errors_become_a_bare_500() {
    let mut app = Registry::new();
    app.mount(fail("secret detail")).unwrap();

    let res = app.handle(request(Method::GET, "/")).await;
    assert_eq!(res.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    assert_eq!(res.body(), b"Internal Server Error");
}

#[tokio::test]
async fn registry_rejects_mutation_once_frozen() {
    let mut app = Registry::new();
    app.mount("ok").unwrap();
    app.freeze();

    assert!(app.is_frozen());
    assert!(matches!(app.mount("late"), Err(Error::Frozen)));
    assert!(matches!(app.replace_root([]), Err(Error::Frozen)));
    assert!(matches!(app.catch(handler::sync(|_tx| Ok(()))), Err(Error::Frozen)));
    assert!(matches!(app.replace_error_handlers([status_page()]), Err(Error::Frozen)));

    let res = app.handle(request(Method::GET, "/")).await;
    assert_eq!(res.body(), b"ok");
}

// ── Routing ───────────────────────────────────────────────────────────────────

fn api_tree(log: &Log) -> Middleware {
    branch![
        PathRouter::subpath("/api"),
        branch![
            PathRouter::subpath("/v1"),
            branch![PathRouter::new("/item"), probe(log, "item")],
            probe(log, "v1"),
        ],
        branch![probe(log, "sibling")],
    ]
}

#[tokio::test]
async fn nested_subpath_routers_compose() {
    let log = new_log();
    let mut tx = new_tx(Method::GET, "/api/v1/item");
    resolve(&mut tx, &api_tree(&log)).await;

    assert_eq!(
        entries(&log),
        [
            "item base=/api/v1/item rel=/",
            "v1 base=/api/v1 rel=/item",
            "sibling base=/api rel=/v1/item",
        ],
    );
}

#[tokio::test]
async fn unmatched_subpath_breaks_its_branch_only() {
    let log = new_log();
    let mut tx = new_tx(Method::GET, "/api/v2/item");
    resolve(&mut tx, &api_tree(&log)).await;
    assert_eq!(entries(&log), ["sibling base=/api rel=/v2/item"]);

    let log = new_log();
    let mut tx = new_tx(Method::GET, "/other");
    resolve(&mut tx, &api_tree(&log)).await;
    assert!(entries(&log).is_empty());
}

#[tokio::test]
async fn regex_params_are_scoped_to_their_branch() {
    let log = new_log();
    let user = Middleware::leaf(handler::sync(|tx| {
        Ok(format!("user {}", tx.param("id").unwrap_or("?")))
    }));
    let outside = {
        let log = Arc::clone(&log);
        handler::sync(move |tx| {
            log.lock().unwrap().push(format!("outside id={:?}", tx.param("id")));
            Ok(())
        })
    };
    let tree = branch![
        branch![PathRouter::new(Pattern::regex(r"^(/users/(?P<id>\d+))").unwrap()), Flow::Continue],
        outside,
        branch![PathRouter::new(Pattern::regex(r"^(/users/(?P<id>\d+))").unwrap()), user],
    ];

    let mut tx = new_tx(Method::GET, "/users/42");
    resolve(&mut tx, &tree).await;
    assert_eq!(entries(&log), ["outside id=None"]);
    assert_eq!(tx.response().body(), b"user 42");
}

#[tokio::test]
async fn method_filter_skips_its_branch() {
    let log = new_log();
    let tree = branch![
        branch![MethodFilter::new(Method::POST), mark(&log, "post")],
        branch![MethodFilter::new(Method::GET).or(Method::HEAD), mark(&log, "read")],
        mark(&log, "always"),
    ];

    let mut tx = new_tx(Method::HEAD, "/");
    resolve(&mut tx, &tree).await;
    assert_eq!(entries(&log), ["read", "always"]);
}

// ── Negotiation ───────────────────────────────────────────────────────────────

fn with_encoding(header: &str) -> Transaction {
    let req = http::Request::get("/")
        .header("accept-encoding", header)
        .body(Bytes::new())
        .unwrap();
    Transaction::new(req.into())
}

#[tokio::test]
async fn negotiation_stores_the_encoding() {
    let mut tx = with_encoding("br;q=0.5, gzip;q=0.8");
    resolve(&mut tx, &branch![Negotiate]).await;

    assert_eq!(tx.locals().get::<Encoding>(), Some(&Encoding::Gzip));
    assert_eq!(tx.response().headers()["vary"], "accept-encoding");

    let mut tx = new_tx(Method::GET, "/");
    resolve(&mut tx, &branch![Negotiate]).await;
    assert_eq!(tx.locals().get::<Encoding>(), Some(&Encoding::Any));
}

#[tokio::test]
async fn unacceptable_encoding_is_a_406_through_the_status_page() {
    let log = new_log();
    let mut tx = with_encoding("gzip;q=0, *;q=0");
    resolve(&mut tx, &branch![Negotiate, mark(&log, "never"), status_page()]).await;

    assert!(entries(&log).is_empty());
    assert_eq!(tx.response().status(), Some(StatusCode::NOT_ACCEPTABLE));
    assert_eq!(tx.response().body(), b"Not Acceptable");
}
