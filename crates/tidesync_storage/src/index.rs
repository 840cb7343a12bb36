//! Ordering keys for secondary indexes.

use serde_json::Value;
use std::cmp::Ordering;

/// A totally ordered key extracted from an indexed document field.
///
/// Ordering across kinds is `Missing < Null < Bool < Number < Text`.
/// Arrays and objects are not indexable and sort as `Missing`.
#[derive(Debug, Clone)]
pub enum IndexKey {
    /// Field absent or not indexable.
    Missing,
    /// JSON null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Any JSON number, compared as `f64`.
    Number(f64),
    /// String.
    Text(String),
}

impl IndexKey {
    /// Extracts the key for `field` from a row document.
    pub fn extract(value: &Value, field: &str) -> Self {
        match value.get(field) {
            None => IndexKey::Missing,
            Some(Value::Null) => IndexKey::Null,
            Some(Value::Bool(b)) => IndexKey::Bool(*b),
            Some(Value::Number(n)) => n.as_f64().map_or(IndexKey::Missing, IndexKey::Number),
            Some(Value::String(s)) => IndexKey::Text(s.clone()),
            Some(Value::Array(_)) | Some(Value::Object(_)) => IndexKey::Missing,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            IndexKey::Missing => 0,
            IndexKey::Null => 1,
            IndexKey::Bool(_) => 2,
            IndexKey::Number(_) => 3,
            IndexKey::Text(_) => 4,
        }
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (IndexKey::Bool(a), IndexKey::Bool(b)) => a.cmp(b),
            (IndexKey::Number(a), IndexKey::Number(b)) => a.total_cmp(b),
            (IndexKey::Text(a), IndexKey::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}
