//! Quality-value parsing and content-encoding negotiation.
//!
//! Only the choice of coding lives here. Compressing the body is left to
//! whoever reads the chosen [`Encoding`] out of the transaction's locals.

use std::fmt;

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use tracing::debug;

use crate::error::Error;
use crate::handler::{Handler, Reply};
use crate::transaction::Transaction;

// ── Quality values ────────────────────────────────────────────────────────────

/// One token's weight and its other parameters, verbatim.
#[derive(Clone, Debug, PartialEq)]
pub struct Preference {
    pub q: f32,
    pub params: Vec<(String, String)>,
}

/// Tokens of an `Accept-*` header, highest `q` first. Tokens with equal `q`
/// keep their header order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QualityValues(Vec<(String, Preference)>);

impl QualityValues {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Preference)> {
        self.0.iter().map(|(token, pref)| (token.as_str(), pref))
    }

    /// Case-insensitive token lookup.
    pub fn get(&self, token: &str) -> Option<&Preference> {
        self.0
            .iter()
            .find(|(t, _)| t.eq_ignore_ascii_case(token))
            .map(|(_, pref)| pref)
    }

    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

/// Parses an `Accept-*` style header.
///
/// `q` defaults to 1 when absent or unparsable. A token that appears twice,
/// in any letter case, keeps its first position and its last parameters.
///
/// ```rust
/// use arbor::middleware::parse_quality_values;
///
/// let prefs = parse_quality_values("text/html,application/json;q=0.9,*/*;q=0.1");
/// let tokens: Vec<&str> = prefs.iter().map(|(token, _)| token).collect();
/// assert_eq!(tokens, ["text/html", "application/json", "*/*"]);
/// assert_eq!(prefs.get("*/*").map(|pref| pref.q), Some(0.1));
/// ```
pub fn parse_quality_values(header: &str) -> QualityValues {
    let mut entries: Vec<(String, Preference)> = Vec::new();

    for segment in header.split(',') {
        let mut parts = segment.split(';');
        let token = parts.next().unwrap_or_default().trim();
        if token.is_empty() {
            continue;
        }

        let mut pref = Preference { q: 1.0, params: Vec::new() };
        for param in parts.map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = param.split_once('=').unwrap_or((param, ""));
            let (key, value) = (key.trim(), value.trim());
            if key.eq_ignore_ascii_case("q") {
                pref.q = value.parse::<f32>().ok().filter(|q| q.is_finite()).unwrap_or(1.0);
            } else {
                pref.params.push((key.to_owned(), value.to_owned()));
            }
        }

        match entries.iter_mut().find(|(t, _)| t.eq_ignore_ascii_case(token)) {
            Some((_, existing)) => *existing = pref,
            None => entries.push((token.to_owned(), pref)),
        }
    }

    // Stable, so equal weights keep header order.
    entries.sort_by(|(_, a), (_, b)| b.q.total_cmp(&a.q));
    QualityValues(entries)
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// A content coding the server can produce.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Encoding {
    Brotli,
    Gzip,
    Deflate,
    Identity,
    /// No stated preference; any coding will do.
    Any,
}

impl Encoding {
    /// Concrete codings in server preference order.
    const PREFERRED: [Encoding; 4] = [Self::Brotli, Self::Gzip, Self::Deflate, Self::Identity];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Brotli   => "br",
            Self::Gzip     => "gzip",
            Self::Deflate  => "deflate",
            Self::Identity => "identity",
            Self::Any      => "*",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        [Self::Brotli, Self::Gzip, Self::Deflate, Self::Identity, Self::Any]
            .into_iter()
            .find(|e| token.eq_ignore_ascii_case(e.as_str()))
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Picks a coding for an `Accept-Encoding` header, `None` when the header
/// is absent.
///
/// ```rust
/// use arbor::Error;
/// use arbor::middleware::{Encoding, choose_encoding};
///
/// assert_eq!(choose_encoding(None).unwrap(), Encoding::Any);
/// assert_eq!(choose_encoding(Some("")).unwrap(), Encoding::Identity);
/// assert_eq!(choose_encoding(Some("br;q=0.5,gzip;q=0.8")).unwrap(), Encoding::Gzip);
/// assert!(matches!(choose_encoding(Some("gzip;q=0,*;q=0")), Err(Error::NotAcceptable)));
/// ```
pub fn choose_encoding(header: Option<&str>) -> Result<Encoding, Error> {
    let Some(header) = header else {
        return Ok(Encoding::Any);
    };

    let prefs = parse_quality_values(header);
    if prefs.is_empty() {
        return Ok(Encoding::Identity);
    }

    let allow_wildcards = prefs.get("*").is_none_or(|wildcard| wildcard.q > 0.0);

    let mut pick = acceptable(&prefs).next();
    if allow_wildcards && matches!(pick, None | Some(Encoding::Any)) {
        // The client left a gap; fill it with our own preference.
        pick = Encoding::PREFERRED
            .into_iter()
            .find(|e| prefs.get(e.as_str()).is_none())
            .or_else(|| acceptable(&prefs).find(|e| *e != Encoding::Any));
    }

    match pick {
        Some(Encoding::Any) | None => Err(Error::NotAcceptable),
        Some(encoding) => Ok(encoding),
    }
}

/// Known codings with a non-zero weight, highest weight first.
fn acceptable(prefs: &QualityValues) -> impl Iterator<Item = Encoding> + '_ {
    prefs
        .iter()
        .filter(|(_, pref)| pref.q > 0.0)
        .filter_map(|(token, _)| Encoding::from_token(token))
}

// ── Middleware ────────────────────────────────────────────────────────────────

/// Negotiates `Accept-Encoding` for the rest of the tree.
///
/// Stores the chosen [`Encoding`] in the transaction's locals and adds
/// `vary: accept-encoding` to the response. Raises
/// [`Error::NotAcceptable`] when the client rules out every coding.
#[derive(Clone, Copy, Debug, Default)]
pub struct Negotiate;

impl Negotiate {
    fn negotiate(tx: &mut Transaction) -> Result<Reply, Error> {
        let header = tx.request().header_list("accept-encoding");
        let encoding = choose_encoding(header.as_deref())?;
        debug!(header = header.as_deref().unwrap_or("-"), %encoding, "negotiated encoding");

        tx.response_mut().append_header("vary", "accept-encoding")?;
        tx.locals_mut().insert(encoding);
        Ok(Reply::Continue)
    }
}

impl Handler for Negotiate {
    fn call<'a>(&'a self, tx: &'a mut Transaction) -> BoxFuture<'a, Result<Reply, Error>> {
        future::ready(Self::negotiate(tx)).boxed()
    }
}
