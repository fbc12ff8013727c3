//! Path routing with subpath scoping.
//!
//! # How nested routers see their base path
//!
//! Routers never talk to each other. A matching router writes an entry into
//! the transaction's path ledger, stamped with the tree position of the
//! branch it sits in:
//!
//! ```text
//! [ Subpath("/api"),                     writes {"/api", []}
//!   [ Subpath("/v1"),                    reads "/api", writes {"/v1", [1]}
//!     [ PathRouter("/item"), handler ]   reads "/api/v1", matches "/item"
//!   ],
//!   [ probe ]                            position [2, 0]: sees "/api" only
//! ]
//! ```
//!
//! An entry stays live only while its stamp is a strict prefix of the
//! current position, i.e. while the walk is still inside the branch that
//! wrote it. Leaving that branch by any route (completion, `BREAK`, `END`,
//! an error) invalidates the entry without anyone popping it.

use std::collections::HashMap;

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use tracing::trace;

use crate::error::Error;
use crate::flow::Flow;
use crate::handler::{Handler, Reply};
use crate::middleware::Pattern;
use crate::transaction::Transaction;

// ── Ledger ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct PathEntry {
    base: String,
    tree_index: Vec<usize>,
    params: HashMap<String, String>,
}

impl PathEntry {
    fn is_live(&self, tree_index: &[usize]) -> bool {
        self.tree_index.len() < tree_index.len() && tree_index.starts_with(&self.tree_index)
    }
}

/// History of matched path segments, keyed by tree position.
#[derive(Debug, Default)]
pub(crate) struct PathLedger {
    history: Vec<PathEntry>,
    /// Accumulated base as of the last write.
    current: String,
}

impl PathLedger {
    /// Accumulated base path visible at `tree_index`. Empty at the root.
    pub(crate) fn base(&self, tree_index: &[usize]) -> String {
        self.live(tree_index).map(|entry| entry.base.as_str()).collect()
    }

    pub(crate) fn current(&self) -> &str {
        &self.current
    }

    /// Innermost live value of a named path parameter.
    pub(crate) fn param(&self, tree_index: &[usize], name: &str) -> Option<&str> {
        self.history
            .iter()
            .rev()
            .filter(|entry| entry.is_live(tree_index))
            .find_map(|entry| entry.params.get(name).map(String::as_str))
    }

    /// Drops stale entries, then records `base` for the branch enclosing
    /// `tree_index`.
    fn record(&mut self, tree_index: &[usize], base: String, params: HashMap<String, String>) {
        self.history.retain(|entry| entry.is_live(tree_index));
        let enclosing = tree_index.split_last().map_or(&[][..], |(_, parent)| parent);
        self.history.push(PathEntry { base, tree_index: enclosing.to_vec(), params });
        self.current = self.history.iter().map(|entry| entry.base.as_str()).collect();
    }

    fn live<'a>(&'a self, tree_index: &'a [usize]) -> impl Iterator<Item = &'a PathEntry> + 'a {
        self.history.iter().filter(move |entry| entry.is_live(tree_index))
    }
}

/// `path` with `base` stripped off, always starting with `/`.
pub(crate) fn relative(path: &str, base: &str) -> String {
    match path.strip_prefix(base) {
        Some("") => "/".to_owned(),
        Some(rest) if rest.starts_with('/') => rest.to_owned(),
        Some(rest) => format!("/{rest}"),
        None => path.to_owned(),
    }
}

/// Leading slash, no trailing slash, root as the empty string.
fn normalize(segment: &str) -> String {
    let trimmed = segment.trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_owned()
    } else {
        format!("/{trimmed}")
    }
}

// ── Router ────────────────────────────────────────────────────────────────────

struct Matched {
    segment: String,
    params: HashMap<String, String>,
}

/// Matches the request path, relative to the base established by enclosing
/// subpath routers, against literal or regex patterns.
///
/// On a match the walk continues with the consumed segment added to the
/// base; otherwise the enclosing branch is abandoned with `BREAK`.
///
/// - [`PathRouter::new`] must consume the whole remaining path (trailing
///   slashes are ignored). Whatever it guards then sees a relative path of `/`.
/// - [`PathRouter::subpath`] consumes a prefix ending on a segment boundary
///   and scopes the rest of its branch beneath it.
///
/// A regex pattern must match at the start of the relative path and, like a
/// literal subpath, end on a segment boundary. Its first capture group, when
/// present, is the consumed segment; named groups become path parameters
/// readable through [`Transaction::param`].
#[derive(Clone, Debug)]
pub struct PathRouter {
    patterns: Vec<Pattern>,
    subpath: bool,
}

impl PathRouter {
    /// A router matching the whole remaining path.
    pub fn new(pattern: impl Into<Pattern>) -> Self {
        Self { patterns: vec![pattern.into()], subpath: false }
    }

    /// A router matching a leading part of the remaining path.
    pub fn subpath(pattern: impl Into<Pattern>) -> Self {
        Self { patterns: vec![pattern.into()], subpath: true }
    }

    /// Adds another accepted pattern. The first matching pattern wins.
    pub fn or(mut self, pattern: impl Into<Pattern>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    /// Tests the request against every pattern and records the consumed
    /// segment on a match.
    pub fn matches(&self, tx: &mut Transaction) -> bool {
        let base = tx.path.base(&tx.tree_index);
        let relative = relative(tx.request().path(), &base);

        let Some(matched) = self.patterns.iter().find_map(|p| self.match_one(p, &relative)) else {
            trace!(path = %relative, base = %base, "path router did not match");
            return false;
        };

        trace!(path = %relative, base = %base, segment = %matched.segment, "path router matched");
        tx.path.record(&tx.tree_index, matched.segment, matched.params);
        true
    }

    fn match_one(&self, pattern: &Pattern, relative: &str) -> Option<Matched> {
        // "/" compares as the empty remainder.
        let remainder = relative.trim_end_matches('/');

        match pattern {
            Pattern::Literal(literal) => {
                let literal = normalize(literal);
                let hit = if self.subpath {
                    remainder
                        .strip_prefix(literal.as_str())
                        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
                } else {
                    remainder == literal
                };
                hit.then(|| Matched { segment: literal, params: HashMap::new() })
            }
            Pattern::Regex(regex) => {
                let captures = regex.captures(relative)?;
                let whole = captures.get(0)?;
                if whole.start() != 0 {
                    return None;
                }
                if !self.subpath && whole.end() < remainder.len() {
                    return None;
                }
                // Same segment boundary as literal subpaths.
                let rest = &relative[whole.end()..];
                if !(rest.is_empty() || rest.starts_with('/') || whole.as_str().ends_with('/')) {
                    return None;
                }
                let segment = captures.get(1).unwrap_or(whole).as_str();
                let params = regex
                    .capture_names()
                    .flatten()
                    .filter_map(|name| {
                        captures.name(name).map(|m| (name.to_owned(), m.as_str().to_owned()))
                    })
                    .collect();
                Some(Matched { segment: normalize(segment), params })
            }
        }
    }
}

impl Handler for PathRouter {
    fn call<'a>(&'a self, tx: &'a mut Transaction) -> BoxFuture<'a, Result<Reply, Error>> {
        let flow = if self.matches(tx) { Flow::Continue } else { Flow::Break };
        future::ready(Ok(Reply::Flow(flow))).boxed()
    }
}
