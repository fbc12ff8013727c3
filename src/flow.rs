//! The three-valued flow signal every resolution step produces.

use std::fmt;

/// How the resolver proceeds after a step.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Flow {
    /// Move on to the next sibling.
    Continue,
    /// Stop the enclosing branch only. Its parent carries on with `Continue`.
    Break,
    /// The response is fully produced. Nothing else in the tree runs.
    End,
}

impl Flow {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Continue => "CONTINUE",
            Self::Break    => "BREAK",
            Self::End      => "END",
        }
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
