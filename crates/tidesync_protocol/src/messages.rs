//! Envelopes exchanged with the server.

use crate::cursor::Until;
use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound POST body: every queued update in one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateBatch<T> {
    /// Items in insertion order.
    pub content: Vec<T>,
}

impl<T> UpdateBatch<T> {
    /// Creates a batch.
    pub fn new(content: Vec<T>) -> Self {
        Self { content }
    }

    /// Returns the number of items.
    pub fn len(&self) -> usize {
        self.content.len()
    }

    /// Returns true if the batch has no items.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

impl<T: Serialize> UpdateBatch<T> {
    /// Encodes to JSON.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl<T: DeserializeOwned> UpdateBatch<T> {
    /// Decodes from JSON.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Inbound GET result: one page of server-side mutations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdatesPage {
    /// Mutations in server order.
    #[serde(default)]
    pub content: Vec<Value>,
    /// Position to resume from once `content` is applied.
    #[serde(default)]
    pub until: Option<Until>,
    /// Whether the server holds more data past this page.
    #[serde(default)]
    pub has_more: bool,
}

impl UpdatesPage {
    /// Creates a page.
    pub fn new(content: Vec<Value>, until: impl Into<Until>, has_more: bool) -> Self {
        Self {
            content,
            until: Some(until.into()),
            has_more,
        }
    }

    /// Returns true if the page carries nothing to apply.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Encodes to JSON.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON.
    ///
    /// An empty body, whitespace or a JSON `null` decodes to `None`.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Option<Self>> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        let page: Option<UpdatesPage> = serde_json::from_slice(bytes)?;
        if let Some(page) = &page {
            if !page.content.is_empty() && page.until.is_none() {
                return Err(ProtocolError::invalid("page has content but no until"));
            }
        }
        Ok(page)
    }
}

/// Opaque server result of a successful POST.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostReceipt(pub Value);

impl PostReceipt {
    /// Decodes from JSON. An empty body is an empty receipt.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self(Value::Null));
        }
        Ok(Self(serde_json::from_slice(bytes)?))
    }
}
