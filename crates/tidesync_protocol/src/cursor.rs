//! Inbound progress markers.

use serde::{Deserialize, Serialize};
use serde_json::Number;
use std::fmt;

/// Opaque high-water mark in the server's update stream.
///
/// Servers hand back a numeric offset, some other number (a fractional or
/// negative timestamp) or an opaque token. The value is echoed verbatim into
/// the next fetch path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Until {
    /// Non-negative integer offset or timestamp.
    Offset(u64),
    /// Any other JSON number, kept exactly as received.
    Number(Number),
    /// Opaque server token.
    Token(String),
}

impl Until {
    /// Returns true if moving from `previous` to `self` does not go backwards.
    ///
    /// Only integers are compared. Fractional numbers and tokens always count
    /// as progress.
    pub fn is_at_or_after(&self, previous: &Until) -> bool {
        match (self.as_integer(), previous.as_integer()) {
            (Some(next), Some(prev)) => next >= prev,
            _ => true,
        }
    }

    fn as_integer(&self) -> Option<i128> {
        match self {
            Until::Offset(n) => Some(i128::from(*n)),
            Until::Number(n) => n.as_i64().map(i128::from),
            Until::Token(_) => None,
        }
    }
}

impl Default for Until {
    fn default() -> Self {
        Until::Offset(0)
    }
}

impl fmt::Display for Until {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Until::Offset(n) => write!(f, "{n}"),
            Until::Number(n) => write!(f, "{n}"),
            Until::Token(t) => f.write_str(t),
        }
    }
}

impl From<u64> for Until {
    fn from(n: u64) -> Self {
        Until::Offset(n)
    }
}

impl From<&str> for Until {
    fn from(t: &str) -> Self {
        Until::Token(t.to_string())
    }
}

/// The persisted inbound cursor document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    /// Last successfully applied position.
    pub until: Until,
}

impl SyncCursor {
    /// Creates a cursor at the given position.
    pub fn new(until: impl Into<Until>) -> Self {
        Self {
            until: until.into(),
        }
    }
}
