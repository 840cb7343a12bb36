//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tidesync_protocol::{PostReceipt, QueuedUpdate, UpdateBatch, UpdatesPage};

/// A sync transport handles network communication with the server.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-process loopback, mock for testing, etc.).
/// Call-level timeouts are the implementation's responsibility.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one outbound batch.
    async fn post(&self, path: &str, batch: &UpdateBatch<QueuedUpdate>)
        -> SyncResult<PostReceipt>;

    /// Fetches one page of remote updates. `None` means an empty body.
    async fn get(&self, path: &str) -> SyncResult<Option<UpdatesPage>>;
}

/// A mock transport for testing.
///
/// Responses are scripted per call and consumed in order. With nothing
/// scripted, `post` acknowledges with an empty receipt and `get` returns an
/// empty body.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    latency: Mutex<Duration>,
    post_responses: Mutex<VecDeque<SyncResult<PostReceipt>>>,
    get_responses: Mutex<VecDeque<SyncResult<Option<UpdatesPage>>>>,
    posts: Mutex<Vec<(String, UpdateBatch<QueuedUpdate>)>>,
    gets: Mutex<Vec<String>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            latency: Mutex::new(Duration::ZERO),
            post_responses: Mutex::new(VecDeque::new()),
            get_responses: Mutex::new(VecDeque::new()),
            posts: Mutex::new(Vec::new()),
            gets: Mutex::new(Vec::new()),
        }
    }

    /// Queues the result of the next unanswered `post`.
    pub fn push_post_response(&self, response: SyncResult<PostReceipt>) {
        self.post_responses.lock().push_back(response);
    }

    /// Queues the result of the next unanswered `get`.
    pub fn push_get_response(&self, response: SyncResult<Option<UpdatesPage>>) {
        self.get_responses.lock().push_back(response);
    }

    /// Sets the connected state. Disconnected calls fail with a retryable
    /// transport error.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Delays every response by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Every `post` received, in order.
    pub fn posts(&self) -> Vec<(String, UpdateBatch<QueuedUpdate>)> {
        self.posts.lock().clone()
    }

    /// Every `get` path received, in order.
    pub fn gets(&self) -> Vec<String> {
        self.gets.lock().clone()
    }

    async fn delay(&self) {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_connected(&self) -> SyncResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::transport_retryable("not connected"))
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn post(
        &self,
        path: &str,
        batch: &UpdateBatch<QueuedUpdate>,
    ) -> SyncResult<PostReceipt> {
        self.posts.lock().push((path.to_string(), batch.clone()));
        self.delay().await;
        self.check_connected()?;
        self.post_responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(PostReceipt::default()))
    }

    async fn get(&self, path: &str) -> SyncResult<Option<UpdatesPage>> {
        self.gets.lock().push(path.to_string());
        self.delay().await;
        self.check_connected()?;
        self.get_responses.lock().pop_front().unwrap_or(Ok(None))
    }
}
