//! Queued outbound mutations.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// A pending outbound mutation as stored in the queue table and sent upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedUpdate {
    /// Row id assigned by the store. Zero until the row is persisted.
    #[serde(default)]
    pub id: u64,
    /// Opaque mutation content.
    pub payload: Value,
    /// Insertion time in unix milliseconds.
    pub queued_at: u64,
}

impl QueuedUpdate {
    /// Creates an unsaved update stamped with the current time.
    pub fn new(payload: Value) -> Self {
        Self {
            id: 0,
            payload,
            queued_at: unix_millis(),
        }
    }

    /// Returns the document written to the queue table.
    ///
    /// The id is owned by the store and is not part of the document.
    pub fn document(&self) -> Value {
        json!({
            "payload": self.payload,
            "queued_at": self.queued_at,
        })
    }

    /// Rebuilds an update from a stored document and its row id.
    pub fn from_document(id: u64, document: Value) -> serde_json::Result<Self> {
        let mut update: QueuedUpdate = serde_json::from_value(document)?;
        update.id = id;
        Ok(update)
    }
}

/// Current time in unix milliseconds.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
