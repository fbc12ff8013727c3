//! Literal-or-regex patterns shared by the path router and method filter.

use http::Method;
use regex::Regex;

use crate::error::Error;

/// A value to match: either a literal string or a regular expression.
#[derive(Clone, Debug)]
pub enum Pattern {
    Literal(String),
    Regex(Regex),
}

impl Pattern {
    /// Compiles `source` as a regular expression pattern.
    pub fn regex(source: &str) -> Result<Self, Error> {
        Ok(Self::Regex(Regex::new(source)?))
    }
}

impl From<&str> for Pattern {
    fn from(literal: &str) -> Self { Self::Literal(literal.to_owned()) }
}

impl From<String> for Pattern {
    fn from(literal: String) -> Self { Self::Literal(literal) }
}

impl From<Regex> for Pattern {
    fn from(regex: Regex) -> Self { Self::Regex(regex) }
}

impl From<Method> for Pattern {
    fn from(method: Method) -> Self { Self::Literal(method.as_str().to_owned()) }
}
