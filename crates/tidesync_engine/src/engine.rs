//! Top-level sync engine.

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::hooks::SyncHooks;
use crate::inbound::InboundSync;
use crate::outbound::OutboundQueue;
use crate::publish::Publisher;
use crate::transport::Transport;
use serde_json::Value;
use std::sync::Arc;
use tidesync_storage::{RowId, Store};
use tracing::info;

/// Runs an outbound queue and an inbound poller over one transport.
///
/// The two halves have independent schedulers and never block each other.
pub struct SyncEngine {
    config: SyncConfig,
    outbound: OutboundQueue,
    inbound: InboundSync,
}

impl SyncEngine {
    /// Creates an engine. Nothing runs until [`SyncEngine::start`].
    ///
    /// # Errors
    ///
    /// Fails if the config is invalid, a table cannot be opened, or no tokio
    /// runtime is available.
    pub fn new(
        config: SyncConfig,
        store: &dyn Store,
        transport: Arc<dyn Transport>,
        publisher: Arc<dyn Publisher>,
        hooks: Arc<dyn SyncHooks>,
    ) -> SyncResult<Self> {
        config.validate()?;
        let outbound = OutboundQueue::new(&config, store, Arc::clone(&transport), Arc::clone(&hooks))?;
        let inbound = InboundSync::new(&config, store, transport, publisher, hooks)?;
        Ok(Self {
            config,
            outbound,
            inbound,
        })
    }

    /// Starts both directions.
    pub fn start(&self) {
        info!(
            updates_path = %self.config.updates_path,
            "starting sync engine"
        );
        self.outbound.start();
        self.inbound.start();
    }

    /// Stops both directions. Queued updates and the cursor are kept.
    pub fn stop(&self) {
        info!("stopping sync engine");
        self.outbound.stop();
        self.inbound.stop();
    }

    /// Queues local mutations for upload.
    pub fn add(&self, updates: Vec<Value>) -> SyncResult<Vec<RowId>> {
        self.outbound.add(updates)
    }

    /// Returns the config the engine was built with.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the outbound half.
    pub fn outbound(&self) -> &OutboundQueue {
        &self.outbound
    }

    /// Returns the inbound half.
    pub fn inbound(&self) -> &InboundSync {
        &self.inbound
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::LogHooks;
    use crate::publish::MemoryPublisher;
    use crate::transport::MockTransport;
    use serde_json::json;
    use tidesync_storage::InMemoryStore;

    fn engine(store: &InMemoryStore, config: SyncConfig) -> SyncResult<SyncEngine> {
        SyncEngine::new(
            config,
            store,
            Arc::new(MockTransport::new()),
            Arc::new(MemoryPublisher::new()),
            Arc::new(LogHooks),
        )
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let store = InMemoryStore::new();
        let config = SyncConfig::default().with_push_interval(std::time::Duration::ZERO);
        assert!(engine(&store, config).is_err());
    }

    #[tokio::test]
    async fn opens_both_tables() {
        let store = InMemoryStore::new();
        let engine = engine(&store, SyncConfig::default()).unwrap();
        assert!(store.table(crate::outbound::QUEUE_TABLE).is_some());
        assert!(store.table(crate::inbound::CURSOR_TABLE).is_some());

        engine.add(vec![json!({"op": "set"})]).unwrap();
        assert_eq!(engine.outbound().len().unwrap(), 1);
    }

    #[tokio::test]
    async fn start_and_stop_toggle_both_schedulers() {
        let store = InMemoryStore::new();
        let engine = engine(&store, SyncConfig::default()).unwrap();

        engine.start();
        assert!(engine.outbound().scheduler().is_armed());
        assert!(engine.inbound().scheduler().is_armed());

        engine.stop();
        assert!(engine.outbound().scheduler().is_stopped());
        assert!(engine.inbound().scheduler().is_stopped());
        assert!(!engine.inbound().scheduler().is_armed());
    }
}
