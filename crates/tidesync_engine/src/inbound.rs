//! Cursor-based inbound poller.
//!
//! Each cycle fetches the page after the persisted cursor, publishes it
//! locally and only then advances the cursor. A failed apply leaves the
//! cursor where it was, so the next cycle fetches the same window again.

use crate::config::SyncConfig;
use crate::error::{ErrorTag, SyncError, SyncResult};
use crate::hooks::{defer_receive, SyncHooks};
use crate::publish::{first_error, Publisher};
use crate::scheduler::Scheduler;
use crate::transport::Transport;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tidesync_protocol::{ProtocolError, SyncCursor, Until, UpdatesPage};
use tidesync_storage::{RowId, Store, Table, TableSchema};
use tracing::{debug, info, warn};

/// Name of the cursor table.
pub const CURSOR_TABLE: &str = "pushlogs";

/// Where the poller is within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundState {
    /// Waiting for the scheduler to fire.
    Idle,
    /// Reading the cursor and fetching a page.
    Fetching,
    /// Publishing a fetched page and advancing the cursor.
    Applying,
}

/// Result of one polling cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Reading the cursor or fetching the page failed.
    FetchFailed,
    /// The server had nothing new.
    Empty,
    /// The page was applied and the cursor advanced.
    Applied {
        /// Items applied.
        count: usize,
        /// Cursor position after the cycle.
        until: Until,
        /// Whether the server reported more data.
        has_more: bool,
    },
    /// Publishing failed; the cursor was left unchanged.
    ApplyFailed,
    /// The page was applied but the cursor could not be written.
    CursorFailed,
    /// The poller was stopped while the fetch was in flight.
    Stopped,
}

/// Statistics about inbound polling.
#[derive(Debug, Clone, Default)]
pub struct InboundStats {
    /// Completed cycles of any outcome.
    pub cycles: u64,
    /// Pages applied.
    pub batches_applied: u64,
    /// Items applied.
    pub updates_received: u64,
    /// Cycles that ended in a failure.
    pub failures: u64,
    /// Last applied page.
    pub last_applied: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Polls the server for remote updates and applies them locally.
pub struct InboundSync {
    inner: Arc<PollInner>,
    scheduler: Scheduler,
}

struct PollInner {
    table: Arc<dyn Table>,
    transport: Arc<dyn Transport>,
    publisher: Arc<dyn Publisher>,
    hooks: Arc<dyn SyncHooks>,
    config: SyncConfig,
    state: RwLock<InboundState>,
    stats: RwLock<InboundStats>,
}

impl InboundSync {
    /// Opens the cursor table and binds the polling task to a new scheduler.
    ///
    /// Polling begins once [`InboundSync::start`] is called.
    pub fn new(
        config: &SyncConfig,
        store: &dyn Store,
        transport: Arc<dyn Transport>,
        publisher: Arc<dyn Publisher>,
        hooks: Arc<dyn SyncHooks>,
    ) -> SyncResult<Self> {
        config.validate()?;
        let table = store.open_table(&TableSchema::new(CURSOR_TABLE))?;

        let inner = Arc::new(PollInner {
            table,
            transport,
            publisher,
            hooks,
            config: config.clone(),
            state: RwLock::new(InboundState::Idle),
            stats: RwLock::new(InboundStats::default()),
        });

        let task_inner = Arc::clone(&inner);
        let scheduler = Scheduler::new("inbound", config.push_interval(), move |scheduler| {
            let inner = Arc::clone(&task_inner);
            async move {
                let outcome = inner.check_for_updates(&scheduler).await;
                inner.rearm(&outcome, &scheduler);
            }
        })?;

        Ok(Self { inner, scheduler })
    }

    /// Starts periodic polling.
    pub fn start(&self) {
        self.scheduler.start();
    }

    /// Stops polling. An in-flight fetch is discarded.
    pub fn stop(&self) {
        self.scheduler.stop();
    }

    /// Arms a poll to run as soon as possible.
    pub fn poll_soon(&self) {
        self.scheduler.reschedule(Duration::ZERO);
    }

    /// Returns the persisted cursor position, `Offset(0)` if none.
    pub fn cursor(&self) -> SyncResult<Until> {
        Ok(self
            .inner
            .read_cursor()?
            .map(|(_, cursor)| cursor.until)
            .unwrap_or_default())
    }

    /// Gets the current state.
    pub fn state(&self) -> InboundState {
        *self.inner.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> InboundStats {
        self.inner.stats.read().clone()
    }

    /// Returns the scheduler driving the polling task.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

impl Drop for InboundSync {
    fn drop(&mut self) {
        self.scheduler.stop();
    }
}

impl PollInner {
    fn set_state(&self, state: InboundState) {
        *self.state.write() = state;
    }

    fn read_cursor(&self) -> SyncResult<Option<(RowId, SyncCursor)>> {
        let Some(row) = self.table.first()? else {
            return Ok(None);
        };
        let cursor: SyncCursor =
            serde_json::from_value(row.value).map_err(|e| SyncError::CorruptRow {
                table: CURSOR_TABLE,
                id: row.id,
                message: e.to_string(),
            })?;
        Ok(Some((row.id, cursor)))
    }

    /// Upserts the singleton cursor row. Returns the position now stored.
    fn write_cursor(&self, next: Until) -> SyncResult<Until> {
        let document = serde_json::to_value(SyncCursor::new(next.clone()))
            .map_err(|e| SyncError::Protocol(ProtocolError::Json(e)))?;

        match self.read_cursor()? {
            Some((_, current)) if !next.is_at_or_after(&current.until) => {
                warn!(
                    current = %current.until,
                    received = %next,
                    "server cursor moved backwards, keeping current position"
                );
                Ok(current.until)
            }
            Some((id, _)) => {
                self.table.update(id, document)?;
                Ok(next)
            }
            None => {
                self.table.add(document)?;
                Ok(next)
            }
        }
    }

    async fn check_for_updates(&self, scheduler: &Scheduler) -> CycleOutcome {
        self.set_state(InboundState::Fetching);
        let outcome = self.run_cycle(scheduler).await;
        self.set_state(InboundState::Idle);

        let mut stats = self.stats.write();
        stats.cycles += 1;
        match &outcome {
            CycleOutcome::Applied { count, .. } => {
                stats.batches_applied += 1;
                stats.updates_received += *count as u64;
                stats.last_applied = Some(Instant::now());
            }
            CycleOutcome::FetchFailed | CycleOutcome::ApplyFailed | CycleOutcome::CursorFailed => {
                stats.failures += 1;
            }
            CycleOutcome::Empty | CycleOutcome::Stopped => {}
        }
        outcome
    }

    async fn run_cycle(&self, scheduler: &Scheduler) -> CycleOutcome {
        let until = match self.read_cursor() {
            Ok(cursor) => cursor.map(|(_, c)| c.until).unwrap_or_default(),
            Err(e) => {
                self.report(&e);
                return CycleOutcome::FetchFailed;
            }
        };

        let path = self.config.fetch_path(&until);
        debug!(%path, "checking for updates");
        let page = match self.transport.get(&path).await {
            Ok(page) => page,
            Err(e) => {
                self.report(&e);
                return CycleOutcome::FetchFailed;
            }
        };

        if scheduler.is_stopped() {
            debug!("stopped during fetch, discarding page");
            return CycleOutcome::Stopped;
        }

        let Some(UpdatesPage {
            content,
            until: next,
            has_more,
        }) = page.filter(|p| !p.is_empty())
        else {
            return CycleOutcome::Empty;
        };

        let Some(next) = next else {
            self.report(&SyncError::Protocol(ProtocolError::invalid(
                "page has content but no until",
            )));
            return CycleOutcome::FetchFailed;
        };

        self.set_state(InboundState::Applying);
        let results = self.publisher.publish(&content).await;
        if let Some(err) = first_error(results) {
            self.report(&SyncError::from(err));
            return CycleOutcome::ApplyFailed;
        }

        let count = content.len();
        defer_receive(&self.hooks, content);

        match self.write_cursor(next) {
            Ok(until) => {
                info!(count, %until, has_more, "applied remote updates");
                CycleOutcome::Applied {
                    count,
                    until,
                    has_more,
                }
            }
            Err(e) => {
                self.report(&e);
                CycleOutcome::CursorFailed
            }
        }
    }

    fn rearm(&self, outcome: &CycleOutcome, scheduler: &Scheduler) {
        match outcome {
            CycleOutcome::Stopped => {}
            CycleOutcome::Applied { has_more: true, .. } => {
                scheduler.reschedule(self.config.more_data_delay());
            }
            _ => scheduler.schedule(),
        }
    }

    fn report(&self, err: &SyncError) {
        self.stats.write().last_error = Some(err.to_string());
        self.hooks.on_error(err, ErrorTag::CheckingUpdates);
    }
}
