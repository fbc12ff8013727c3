//! The middleware resolver.
//!
//! # Walking without recursion
//!
//! A tree is walked depth-first, left to right, with an explicit stack of
//! branch cursors instead of the native call stack. Every loop iteration
//! performs one step:
//!
//! ```text
//!          ┌──────────── Again(work) ────────────┐
//!          ↓                                     │
//! next entry ──→ step ──→ Descend(branch) ──→ push cursor
//!                  │
//!                  └──→ Signal(CONTINUE)  next sibling
//!                       Signal(BREAK)     pop innermost cursor
//!                       Signal(END)       pop everything, return
//! ```
//!
//! Nesting depth is bounded by the heap, not the stack, and the loop checks
//! between steps whether the transport has given up on the response.
//!
//! # Errors
//!
//! A handler error does not abort the walk. It puts the transaction into
//! [`TxState::Error`](crate::TxState::Error), after which every entry except
//! error handlers is skipped as an implicit `CONTINUE`. The error therefore
//! bubbles out of nested branches until an error handler at some enclosing
//! level claims it.

use std::sync::Arc;

use bytes::BytesMut;
use http::StatusCode;
use tracing::{debug, trace};

use crate::error::Error;
use crate::flow::Flow;
use crate::handler::Reply;
use crate::middleware::Middleware;
use crate::transaction::Transaction;

/// Walks `entry` against `tx` and returns the terminal flow signal.
///
/// A branch walked to completion reports `CONTINUE`; a `BREAK` only escapes
/// when `entry` itself is not a branch.
pub async fn resolve(tx: &mut Transaction, entry: &Middleware) -> Flow {
    Walk::new(entry.clone(), false).run(tx).await
}

/// Walks `root`, then the terminal error-handler collection `errors`, which
/// is entered regardless of error state. Both sit side by side under one
/// virtual branch, so they see positions `[0, ..]` and `[1, ..]`.
///
/// Inside the terminal collection nothing is skipped for carrying an error:
/// branches, routers and leaves all run, so error handlers can be nested
/// and routed. Error handlers still idle while there is no error.
pub(crate) async fn resolve_with_fallback(
    tx: &mut Transaction,
    root: &Middleware,
    errors: &Arc<[Middleware]>,
) -> Flow {
    tx.tree_index.push(0);
    let mut flow = Walk::new(root.clone(), false).run(tx).await;

    if flow != Flow::End && !errors.is_empty() {
        if let Some(slot) = tx.tree_index.last_mut() {
            *slot = 1;
        }
        flow = Walk::new(Middleware::Branch(Arc::clone(errors)), true).run(tx).await;
    }

    tx.tree_index.pop();
    flow
}

// ── Walk state ────────────────────────────────────────────────────────────────

/// Cursor into one branch being walked.
struct Frame {
    entries: Arc<[Middleware]>,
    next: usize,
    /// Inside the terminal error-handler collection.
    terminal: bool,
}

/// The next thing to classify.
enum Work {
    Entry(Middleware),
    Reply(Reply),
}

/// What one step asks the walk to do.
enum Outcome {
    Signal(Flow),
    Descend(Arc<[Middleware]>),
    /// Classify this instead, as part of the same step.
    Again(Work),
}

struct Walk {
    frames: Vec<Frame>,
    start: Option<Work>,
    terminal: bool,
}

impl Walk {
    /// `terminal` marks `start` as the error-handler collection.
    fn new(start: Middleware, terminal: bool) -> Self {
        Self { frames: Vec::new(), start: Some(Work::Entry(start)), terminal }
    }

    async fn run(mut self, tx: &mut Transaction) -> Flow {
        let mut pending = self.start.take().map(|work| (work, self.terminal));

        loop {
            let (work, terminal) = match pending.take() {
                Some(next) => next,
                None => match self.advance(tx) {
                    Some(next) => next,
                    None => return Flow::Continue,
                },
            };

            if tx.response().is_closed() {
                debug!(index = ?tx.tree_index(), "response closed, abandoning walk");
                self.unwind(tx);
                return Flow::End;
            }

            let outcome = match work {
                Work::Entry(entry) => dispatch(tx, entry, terminal).await,
                Work::Reply(reply) => apply(tx, reply).await,
            };

            match outcome {
                Outcome::Again(work) => pending = Some((work, terminal)),
                Outcome::Descend(entries) => {
                    self.frames.push(Frame { entries, next: 0, terminal });
                    tx.tree_index.push(0);
                }
                Outcome::Signal(Flow::Continue) => {}
                Outcome::Signal(Flow::Break) => {
                    if self.frames.is_empty() {
                        return Flow::Break;
                    }
                    // Only the innermost branch stops; its parent moves on.
                    self.pop(tx);
                }
                Outcome::Signal(Flow::End) => {
                    self.unwind(tx);
                    return Flow::End;
                }
            }
        }
    }

    /// Next child of the innermost unfinished branch, closing finished ones.
    fn advance(&mut self, tx: &mut Transaction) -> Option<(Work, bool)> {
        loop {
            let frame = self.frames.last_mut()?;
            if let Some(entry) = frame.entries.get(frame.next) {
                let entry = entry.clone();
                if let Some(slot) = tx.tree_index.last_mut() {
                    *slot = frame.next;
                }
                frame.next += 1;
                return Some((Work::Entry(entry), frame.terminal));
            }
            self.pop(tx);
        }
    }

    fn pop(&mut self, tx: &mut Transaction) {
        if self.frames.pop().is_some() {
            tx.tree_index.pop();
        }
    }

    fn unwind(&mut self, tx: &mut Transaction) {
        while !self.frames.is_empty() {
            self.pop(tx);
        }
    }
}

// ── Steps ─────────────────────────────────────────────────────────────────────

async fn dispatch(tx: &mut Transaction, entry: Middleware, terminal: bool) -> Outcome {
    let skip = if terminal {
        tx.enter_error_handlers();
        entry.is_error_handler() && !tx.is_error()
    } else {
        tx.is_error() != entry.is_error_handler()
    };
    if skip {
        trace!(?entry, index = ?tx.tree_index(), error = tx.is_error(), "skipping entry");
        return Outcome::Signal(Flow::Continue);
    }

    match entry {
        Middleware::Flow(flow) => Outcome::Signal(flow),
        Middleware::Status(code) => Outcome::Signal(send_status(tx, code)),
        Middleware::Body(body) => {
            tx.response_mut().send(body);
            Outcome::Signal(Flow::End)
        }
        Middleware::Branch(entries) => Outcome::Descend(entries),
        Middleware::Pending(entry) => Outcome::Again(Work::Entry(entry.await)),
        Middleware::Leaf(handler) => match handler.call(tx).await {
            Ok(reply) => Outcome::Again(Work::Reply(reply)),
            Err(err) => {
                raise(tx, err);
                Outcome::Signal(Flow::Continue)
            }
        },
        Middleware::ErrorHandler(handler) => {
            // The handler only counts as successful once its reply has
            // fully settled.
            match settle(handler.call(tx).await).await {
                Ok(reply) => {
                    if let Some(err) = tx.recover() {
                        debug!(error = %err, index = ?tx.tree_index(), "error handled");
                    }
                    Outcome::Again(Work::Reply(reply))
                }
                Err(err) => {
                    raise(tx, err);
                    Outcome::Signal(Flow::Continue)
                }
            }
        }
    }
}

async fn apply(tx: &mut Transaction, reply: Reply) -> Outcome {
    match reply {
        Reply::Continue => Outcome::Signal(Flow::Continue),
        Reply::Flow(flow) => Outcome::Signal(flow),
        Reply::Status(code) => Outcome::Signal(send_status(tx, code)),
        Reply::Body(body) => {
            tx.response_mut().send(body);
            Outcome::Signal(Flow::End)
        }
        Reply::Chunks(chunks) => {
            let body = chunks.iter().fold(BytesMut::new(), |mut body, chunk| {
                body.extend_from_slice(chunk);
                body
            });
            tx.response_mut().send(body.freeze());
            Outcome::Signal(Flow::End)
        }
        Reply::Pending(fut) => match fut.await {
            Ok(reply) => Outcome::Again(Work::Reply(reply)),
            Err(err) => {
                raise(tx, err);
                Outcome::Signal(Flow::Continue)
            }
        },
        Reply::Entry(entry) => Outcome::Again(Work::Entry(entry)),
    }
}

/// Awaits pending replies until something classifiable, or an error, is left.
async fn settle(mut result: Result<Reply, Error>) -> Result<Reply, Error> {
    loop {
        match result {
            Ok(Reply::Pending(fut)) => result = fut.await,
            other => return other,
        }
    }
}

fn send_status(tx: &mut Transaction, code: i64) -> Flow {
    let status = u16::try_from(code).ok().and_then(|code| StatusCode::from_u16(code).ok());
    match status {
        Some(status) => {
            tx.response_mut().set_status(status).end();
            Flow::End
        }
        None => {
            raise(tx, Error::InvalidStatus(code));
            Flow::Continue
        }
    }
}

fn raise(tx: &mut Transaction, err: Error) {
    debug!(error = %err, index = ?tx.tree_index(), "entering error state");
    tx.fail(err);
}
