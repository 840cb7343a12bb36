//! Durable outbound queue.
//!
//! Local mutations are written to the `updates` table and flushed upstream
//! as one batch per scheduler fire. Rows are deleted only after the server
//! acknowledged the batch that carried them, so a failed flush always
//! resends the full unacknowledged set.

use crate::config::SyncConfig;
use crate::error::{ErrorTag, SyncError, SyncResult};
use crate::hooks::SyncHooks;
use crate::scheduler::Scheduler;
use crate::transport::Transport;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tidesync_protocol::{QueuedUpdate, UpdateBatch};
use tidesync_storage::{RowId, Store, Table, TableSchema};
use tracing::{debug, info, warn};

/// Name of the queue table.
pub const QUEUE_TABLE: &str = "updates";

/// Secondary index on the enqueue timestamp.
pub const QUEUED_AT_INDEX: &str = "queued_at";

/// Result of one flush cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing queued; the transport was not contacted.
    Empty,
    /// The batch was acknowledged.
    Sent {
        /// Rows included in the batch.
        count: usize,
        /// Acknowledged rows whose delete failed.
        leaked: usize,
    },
    /// The queue could not be read.
    ReadFailed,
    /// The transport rejected the batch; retry is armed.
    PostFailed,
    /// The scheduler was stopped before the batch was sent.
    Stopped,
}

/// Statistics about outbound flushes.
#[derive(Debug, Clone, Default)]
pub struct OutboundStats {
    /// Batches acknowledged by the server.
    pub flushes: u64,
    /// Updates acknowledged by the server.
    pub updates_posted: u64,
    /// Failed posts.
    pub post_failures: u64,
    /// Acknowledged rows that could not be deleted.
    pub leaked_rows: u64,
    /// Last acknowledged flush.
    pub last_flush: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Buffers local mutations durably and flushes them to the server.
pub struct OutboundQueue {
    inner: Arc<QueueInner>,
    scheduler: Scheduler,
}

struct QueueInner {
    table: Arc<dyn Table>,
    transport: Arc<dyn Transport>,
    hooks: Arc<dyn SyncHooks>,
    updates_path: String,
    retry_interval: Duration,
    stats: RwLock<OutboundStats>,
}

impl OutboundQueue {
    /// Opens the queue table and binds the flush task to a new scheduler.
    ///
    /// The queue does not flush until [`OutboundQueue::start`] or
    /// [`OutboundQueue::add`] arms it.
    pub fn new(
        config: &SyncConfig,
        store: &dyn Store,
        transport: Arc<dyn Transport>,
        hooks: Arc<dyn SyncHooks>,
    ) -> SyncResult<Self> {
        config.validate()?;
        let table = store.open_table(&TableSchema::new(QUEUE_TABLE).with_index(QUEUED_AT_INDEX))?;

        let inner = Arc::new(QueueInner {
            table,
            transport,
            hooks,
            updates_path: config.updates_path.clone(),
            retry_interval: config.post_retry_interval(),
            stats: RwLock::new(OutboundStats::default()),
        });

        let task_inner = Arc::clone(&inner);
        let scheduler = Scheduler::new("outbound", config.post_interval(), move |scheduler| {
            let inner = Arc::clone(&task_inner);
            async move {
                inner.flush(&scheduler).await;
            }
        })?;

        Ok(Self { inner, scheduler })
    }

    /// Starts periodic flushing.
    pub fn start(&self) {
        self.scheduler.start();
    }

    /// Stops flushing. Queued rows stay in the table.
    pub fn stop(&self) {
        self.scheduler.stop();
    }

    /// Persists every payload as a queued update and arms a flush.
    ///
    /// Each row is an independent write. On the first failure the error is
    /// returned and no flush is armed; rows written before the failure stay
    /// queued.
    pub fn add(&self, updates: Vec<Value>) -> SyncResult<Vec<RowId>> {
        let mut ids = Vec::with_capacity(updates.len());
        for payload in updates {
            let update = QueuedUpdate::new(payload);
            let id = self.inner.table.add(update.document()).map_err(|e| {
                warn!(error = %e, "failed to queue update");
                SyncError::from(e)
            })?;
            ids.push(id);
        }

        debug!(count = ids.len(), "queued updates");
        self.scheduler.schedule();
        Ok(ids)
    }

    /// Arms a flush to run as soon as possible.
    pub fn flush_soon(&self) {
        self.scheduler.reschedule(Duration::ZERO);
    }

    /// Returns the queued updates in insertion order.
    pub fn pending(&self) -> SyncResult<Vec<QueuedUpdate>> {
        self.inner.read_all()
    }

    /// Returns the number of queued updates.
    pub fn len(&self) -> SyncResult<usize> {
        Ok(self.inner.table.len()?)
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> SyncResult<bool> {
        Ok(self.inner.table.is_empty()?)
    }

    /// Gets the current stats.
    pub fn stats(&self) -> OutboundStats {
        self.inner.stats.read().clone()
    }

    /// Returns the scheduler driving the flush task.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

impl Drop for OutboundQueue {
    fn drop(&mut self) {
        self.scheduler.stop();
    }
}

impl QueueInner {
    // Row ids grow with every insert, so id order is insertion order even
    // when the wall clock behind `queued_at` steps backwards. Rows that fail
    // to decode are reported and left in place.
    fn read_all(&self) -> SyncResult<Vec<QueuedUpdate>> {
        let rows = self.table.collect_all()?;
        let mut updates = Vec::with_capacity(rows.len());
        for row in rows {
            match QueuedUpdate::from_document(row.id, row.value) {
                Ok(update) => updates.push(update),
                Err(e) => self.report(
                    &SyncError::CorruptRow {
                        table: QUEUE_TABLE,
                        id: row.id,
                        message: e.to_string(),
                    },
                    ErrorTag::SyncQueue,
                ),
            }
        }
        Ok(updates)
    }

    async fn flush(&self, scheduler: &Scheduler) -> FlushOutcome {
        let updates = match self.read_all() {
            Ok(updates) => updates,
            Err(e) => {
                self.report(&e, ErrorTag::SyncQueue);
                return FlushOutcome::ReadFailed;
            }
        };

        if updates.is_empty() {
            return FlushOutcome::Empty;
        }
        if scheduler.is_stopped() {
            return FlushOutcome::Stopped;
        }

        info!(count = updates.len(), "sending queued updates to server");
        let batch = UpdateBatch::new(updates);

        let receipt = match self.transport.post(&self.updates_path, &batch).await {
            Ok(receipt) => receipt,
            Err(e) => {
                self.stats.write().post_failures += 1;
                self.report(&e, ErrorTag::SyncRequest);
                scheduler.reschedule(self.retry_interval);
                return FlushOutcome::PostFailed;
            }
        };

        let mut leaked = 0;
        for update in &batch.content {
            if let Err(e) = self.table.delete(update.id) {
                leaked += 1;
                self.report(&SyncError::from(e), ErrorTag::SyncQueue);
            }
        }
        if leaked > 0 {
            warn!(leaked, "acknowledged updates are still queued and will be resent");
        }

        {
            let mut stats = self.stats.write();
            stats.flushes += 1;
            stats.updates_posted += batch.len() as u64;
            stats.leaked_rows += leaked as u64;
            stats.last_flush = Some(Instant::now());
        }

        self.hooks.on_post_updates(&receipt);
        FlushOutcome::Sent {
            count: batch.len(),
            leaked,
        }
    }

    fn report(&self, err: &SyncError, tag: ErrorTag) {
        self.stats.write().last_error = Some(err.to_string());
        self.hooks.on_error(err, tag);
    }
}
