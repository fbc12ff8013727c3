//! Request-method filter.
//!
//! Literal patterns compare case-sensitively, per RFC 9110 §9.1. Regex
//! patterns match anywhere unless anchored.

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use http::Method;

use crate::error::Error;
use crate::flow::Flow;
use crate::handler::{Handler, Reply};
use crate::middleware::Pattern;
use crate::transaction::Transaction;

/// Continues when the request method matches any pattern, breaks out of the
/// enclosing branch otherwise.
///
/// ```rust
/// use arbor::branch;
/// use arbor::middleware::MethodFilter;
/// use http::Method;
///
/// let reads = branch![
///     MethodFilter::new(Method::GET).or(Method::HEAD),
///     "only for reads",
/// ];
/// ```
#[derive(Clone, Debug)]
pub struct MethodFilter {
    patterns: Vec<Pattern>,
}

impl MethodFilter {
    pub fn new(pattern: impl Into<Pattern>) -> Self {
        Self { patterns: vec![pattern.into()] }
    }

    /// Adds another accepted pattern.
    pub fn or(mut self, pattern: impl Into<Pattern>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    pub fn matches(&self, method: &Method) -> bool {
        let method = method.as_str();
        self.patterns.iter().any(|pattern| match pattern {
            Pattern::Literal(literal) => literal == method,
            Pattern::Regex(regex) => regex.is_match(method),
        })
    }
}

impl Handler for MethodFilter {
    fn call<'a>(&'a self, tx: &'a mut Transaction) -> BoxFuture<'a, Result<Reply, Error>> {
        let flow = if self.matches(tx.request().method()) { Flow::Continue } else { Flow::Break };
        future::ready(Ok(Reply::Flow(flow))).boxed()
    }
}
