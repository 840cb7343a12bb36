//! Error reporting and observer hooks.

use crate::error::{ErrorTag, SyncError};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tidesync_protocol::PostReceipt;
use tracing::error;

/// Callbacks the engine invokes as it works.
///
/// Every method has a default, so implementors only override what they need.
/// The default `on_error` logs through `tracing`.
pub trait SyncHooks: Send + Sync {
    /// Called for every failure, tagged with the subsystem that hit it.
    fn on_error(&self, err: &SyncError, tag: ErrorTag) {
        error!(tag = tag.as_str(), error = %err, "sync error");
    }

    /// Called after an outbound batch was acknowledged.
    fn on_post_updates(&self, _receipt: &PostReceipt) {}

    /// Called after an inbound batch was applied locally.
    ///
    /// Always invoked from a separate task, never from inside the publish
    /// call stack.
    fn on_receive_updates(&self, _items: &[Value]) {}
}

/// Hooks that only log errors.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHooks;

impl SyncHooks for LogHooks {}

/// Hooks that record every call, for tests.
#[derive(Debug, Default)]
pub struct RecordingHooks {
    errors: Mutex<Vec<(String, ErrorTag)>>,
    posts: Mutex<Vec<PostReceipt>>,
    received: Mutex<Vec<Vec<Value>>>,
}

impl RecordingHooks {
    /// Creates empty hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reported errors as `(message, tag)` pairs.
    pub fn errors(&self) -> Vec<(String, ErrorTag)> {
        self.errors.lock().clone()
    }

    /// Tags of reported errors, in order.
    pub fn error_tags(&self) -> Vec<ErrorTag> {
        self.errors.lock().iter().map(|(_, tag)| *tag).collect()
    }

    /// Receipts passed to `on_post_updates`.
    pub fn posts(&self) -> Vec<PostReceipt> {
        self.posts.lock().clone()
    }

    /// Batches passed to `on_receive_updates`.
    pub fn received(&self) -> Vec<Vec<Value>> {
        self.received.lock().clone()
    }
}

impl SyncHooks for RecordingHooks {
    fn on_error(&self, err: &SyncError, tag: ErrorTag) {
        self.errors.lock().push((err.to_string(), tag));
    }

    fn on_post_updates(&self, receipt: &PostReceipt) {
        self.posts.lock().push(receipt.clone());
    }

    fn on_receive_updates(&self, items: &[Value]) {
        self.received.lock().push(items.to_vec());
    }
}

/// Notifies `on_receive_updates` once the current task yields.
pub(crate) fn defer_receive(hooks: &Arc<dyn SyncHooks>, items: Vec<Value>) {
    let hooks = Arc::clone(hooks);
    tokio::spawn(async move {
        hooks.on_receive_updates(&items);
    });
}
