//! HTTP transport implementation.
//!
//! The actual HTTP client is abstracted via a trait so any library (reqwest,
//! hyper, a platform bridge) can be plugged in. Bodies are JSON.

use crate::error::{SyncError, SyncResult};
use crate::transport::Transport;
use async_trait::async_trait;
use parking_lot::RwLock;
use tidesync_protocol::{PostReceipt, QueuedUpdate, UpdateBatch, UpdatesPage};
use tracing::debug;

/// HTTP client abstraction.
///
/// Implementations return the response body on a 2xx status and an error
/// message otherwise. Timeouts belong to the client.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a POST request with a JSON body and returns the response body.
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String>;

    /// Sends a GET request and returns the response body.
    async fn get(&self, url: &str) -> Result<Vec<u8>, String>;
}

/// HTTP-based sync transport.
pub struct HttpTransport<C: HttpClient> {
    /// Base URL of the server (e.g., "https://sync.example.com").
    base_url: String,
    client: C,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn record<T>(&self, result: Result<T, String>) -> SyncResult<T> {
        match result {
            Ok(value) => {
                *self.last_error.write() = None;
                Ok(value)
            }
            Err(e) => {
                *self.last_error.write() = Some(e.clone());
                Err(SyncError::transport_retryable(e))
            }
        }
    }
}

#[async_trait]
impl<C: HttpClient> Transport for HttpTransport<C> {
    async fn post(
        &self,
        path: &str,
        batch: &UpdateBatch<QueuedUpdate>,
    ) -> SyncResult<PostReceipt> {
        let body = batch.encode()?;
        let url = self.url(path);
        debug!(%url, items = batch.len(), "POST");
        let response = self.client.post(&url, body).await;
        let response = self.record(response)?;
        Ok(PostReceipt::decode(&response)?)
    }

    async fn get(&self, path: &str) -> SyncResult<Option<UpdatesPage>> {
        let url = self.url(path);
        debug!(%url, "GET");
        let response = self.client.get(&url).await;
        let response = self.record(response)?;
        Ok(UpdatesPage::decode(&response)?)
    }
}
