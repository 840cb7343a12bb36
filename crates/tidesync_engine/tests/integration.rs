//! End-to-end tests for the sync engine on a paused tokio clock.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tidesync_engine::{
    ApplyError, ErrorTag, MemoryPublisher, MockTransport, Publisher, RecordingHooks, SyncConfig,
    SyncEngine, SyncError,
};
use tidesync_protocol::{PostReceipt, Until, UpdatesPage};
use tidesync_storage::{InMemoryStore, Row, Store, Table, TableSchema};

/// Materializes `{"key": .., ..}` items into a table, replacing rows with the
/// same key.
struct KeyedTablePublisher {
    table: Arc<dyn Table>,
}

impl KeyedTablePublisher {
    fn find(&self, key: &Value) -> Option<Row> {
        let mut found = None;
        self.table
            .all(&mut |row| {
                if row.value.get("key") == Some(key) {
                    found = Some(row);
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .ok()?;
        found
    }
}

#[async_trait]
impl Publisher for KeyedTablePublisher {
    async fn publish(&self, items: &[Value]) -> Vec<Result<(), ApplyError>> {
        items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let existing = item.get("key").and_then(|key| self.find(key));
                let written = match existing {
                    Some(row) => self.table.update(row.id, item.clone()),
                    None => self.table.add(item.clone()).map(|_| ()),
                };
                written.map_err(|e| ApplyError::new(i, e.to_string()))
            })
            .collect()
    }
}

struct Harness {
    store: InMemoryStore,
    transport: Arc<MockTransport>,
    publisher: Arc<MemoryPublisher>,
    hooks: Arc<RecordingHooks>,
    engine: SyncEngine,
}

/// Installs a test subscriber once; set `RUST_LOG` to see engine logs.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn harness() -> Harness {
    init_tracing();
    let store = InMemoryStore::new();
    let transport = Arc::new(MockTransport::new());
    let publisher = Arc::new(MemoryPublisher::new());
    let hooks = Arc::new(RecordingHooks::new());
    let engine = SyncEngine::new(
        SyncConfig::default(),
        &store,
        transport.clone(),
        publisher.clone(),
        hooks.clone(),
    )
    .unwrap();
    Harness {
        store,
        transport,
        publisher,
        hooks,
        engine,
    }
}

/// Lets spawned tasks run without moving the clock.
async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

async fn advance(millis: u64) {
    tokio::time::sleep(Duration::from_millis(millis)).await;
    settle().await;
}

fn page(items: &[Value], until: impl Into<Until>, has_more: bool) -> UpdatesPage {
    UpdatesPage::new(items.to_vec(), until, has_more)
}

#[tokio::test(start_paused = true)]
async fn added_updates_are_flushed_once_and_removed() {
    let h = harness();
    h.transport
        .push_post_response(Ok(PostReceipt(json!({"accepted": 2}))));

    h.engine
        .add(vec![json!({"op": "put", "key": "a"}), json!({"op": "put", "key": "b"})])
        .unwrap();
    assert_eq!(h.engine.outbound().len().unwrap(), 2);

    advance(1_000).await;
    assert!(h.transport.posts().is_empty());

    advance(1_000).await;
    let posts = h.transport.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].0, "/api/updates");
    assert_eq!(posts[0].1.len(), 2);
    assert!(h.engine.outbound().is_empty().unwrap());
    assert_eq!(h.hooks.posts(), vec![PostReceipt(json!({"accepted": 2}))]);

    // An empty queue never reaches the transport.
    advance(10_000).await;
    assert_eq!(h.transport.posts().len(), 1);
    h.engine.stop();
}

#[tokio::test(start_paused = true)]
async fn failed_post_retries_after_retry_interval() {
    let h = harness();
    h.transport
        .push_post_response(Err(SyncError::transport_retryable("503")));

    h.engine.add(vec![json!(1)]).unwrap();
    advance(1_600).await;
    assert_eq!(h.transport.posts().len(), 1);
    assert_eq!(h.hooks.error_tags(), vec![ErrorTag::SyncRequest]);
    assert_eq!(h.engine.outbound().len().unwrap(), 1);

    // Retry is due 10 s after the failure, not at the 1.5 s interval.
    advance(9_800).await;
    assert_eq!(h.transport.posts().len(), 1);

    advance(200).await;
    let posts = h.transport.posts();
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[1].1.content[0].payload, json!(1));
    assert!(h.engine.outbound().is_empty().unwrap());
    assert_eq!(h.engine.outbound().stats().post_failures, 1);
    h.engine.stop();
}

#[tokio::test(start_paused = true)]
async fn failed_post_resends_rows_added_meanwhile() {
    let h = harness();
    h.transport
        .push_post_response(Err(SyncError::transport_retryable("offline")));

    h.engine.add(vec![json!("first")]).unwrap();
    advance(1_600).await;
    h.engine.add(vec![json!("second")]).unwrap();

    // add() re-arms at the normal interval, replacing the retry arm.
    advance(1_600).await;
    let posts = h.transport.posts();
    assert_eq!(posts.len(), 2);
    let payloads: Vec<_> = posts[1].1.content.iter().map(|u| u.payload.clone()).collect();
    assert_eq!(payloads, vec![json!("first"), json!("second")]);
    h.engine.stop();
}

#[tokio::test(start_paused = true)]
async fn add_during_slow_failing_post_keeps_retry_backoff() {
    let h = harness();
    h.transport.set_latency(Duration::from_secs(2));
    h.transport
        .push_post_response(Err(SyncError::transport_retryable("gateway timeout")));

    // Post starts at 1.5 s and fails at 3.5 s. The second add arms a flush
    // for 3.1 s, which is still waiting on the first run when it fails.
    h.engine.add(vec![json!("first")]).unwrap();
    advance(1_600).await;
    h.engine.add(vec![json!("second")]).unwrap();

    advance(3_000).await;
    assert_eq!(h.transport.posts().len(), 1);
    assert_eq!(h.hooks.error_tags(), vec![ErrorTag::SyncRequest]);

    // Retry is due at 13.5 s, ten seconds after the failure.
    advance(8_800).await;
    assert_eq!(h.transport.posts().len(), 1);

    advance(200).await;
    let posts = h.transport.posts();
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[1].1.len(), 2);

    advance(2_000).await;
    assert!(h.engine.outbound().is_empty().unwrap());
    h.engine.stop();
}

#[tokio::test(start_paused = true)]
async fn inbound_polls_at_push_interval_and_advances_cursor() {
    let h = harness();
    h.transport
        .push_get_response(Ok(Some(page(&[json!("A"), json!("B")], 42, false))));

    h.engine.start();
    advance(14_900).await;
    assert!(h.transport.gets().is_empty());

    advance(200).await;
    assert_eq!(h.transport.gets(), vec!["/api/updates/0".to_string()]);
    assert_eq!(h.publisher.applied(), vec![json!("A"), json!("B")]);
    assert_eq!(h.engine.inbound().cursor().unwrap(), Until::Offset(42));
    assert_eq!(h.hooks.received(), vec![vec![json!("A"), json!("B")]]);

    advance(15_000).await;
    assert_eq!(h.transport.gets()[1], "/api/updates/42");
    h.engine.stop();
}

#[tokio::test(start_paused = true)]
async fn has_more_repolls_after_short_delay() {
    let h = harness();
    h.transport
        .push_get_response(Ok(Some(page(&[json!(1)], 10, true))));
    h.transport
        .push_get_response(Ok(Some(page(&[json!(2)], 20, false))));

    h.engine.start();
    advance(15_100).await;
    assert_eq!(h.transport.gets().len(), 1);

    advance(1_000).await;
    let gets = h.transport.gets();
    assert_eq!(gets.len(), 2);
    assert_eq!(gets[1], "/api/updates/10");

    // No more data: back to the normal interval.
    advance(14_000).await;
    assert_eq!(h.transport.gets().len(), 2);
    advance(1_000).await;
    assert_eq!(h.transport.gets().len(), 3);
    assert_eq!(h.transport.gets()[2], "/api/updates/20");
    h.engine.stop();
}

#[tokio::test(start_paused = true)]
async fn apply_failure_refetches_same_window() {
    let h = harness();
    h.publisher.fail_next(ApplyError::new(0, "conflict"));
    h.transport
        .push_get_response(Ok(Some(page(&[json!("x")], 7, false))));
    h.transport
        .push_get_response(Ok(Some(page(&[json!("x")], 7, false))));

    h.engine.start();
    advance(15_100).await;
    assert_eq!(h.engine.inbound().cursor().unwrap(), Until::Offset(0));
    assert_eq!(h.hooks.error_tags(), vec![ErrorTag::CheckingUpdates]);

    advance(15_000).await;
    let gets = h.transport.gets();
    assert_eq!(gets, vec!["/api/updates/0".to_string(), "/api/updates/0".to_string()]);
    assert_eq!(h.engine.inbound().cursor().unwrap(), Until::Offset(7));
    h.engine.stop();
}

#[tokio::test(start_paused = true)]
async fn stop_during_fetch_discards_page() {
    let h = harness();
    h.transport.set_latency(Duration::from_secs(5));
    h.transport
        .push_get_response(Ok(Some(page(&[json!("late")], 99, false))));

    h.engine.start();
    advance(16_000).await;
    assert_eq!(h.transport.gets().len(), 1);

    h.engine.stop();
    advance(60_000).await;
    assert_eq!(h.transport.gets().len(), 1);
    assert_eq!(h.publisher.batches(), 0);
    assert_eq!(h.engine.inbound().cursor().unwrap(), Until::Offset(0));
    assert!(h.store.table("pushlogs").unwrap().rows().is_empty());
}

#[tokio::test(start_paused = true)]
async fn directions_run_independently() {
    let h = harness();
    h.transport.set_connected(false);
    h.engine.start();
    h.engine.add(vec![json!("queued")]).unwrap();

    advance(15_100).await;
    let tags = h.hooks.error_tags();
    assert!(tags.contains(&ErrorTag::SyncRequest));
    assert!(tags.contains(&ErrorTag::CheckingUpdates));
    assert_eq!(h.engine.outbound().len().unwrap(), 1);

    h.transport.set_connected(true);
    advance(15_000).await;
    assert!(h.engine.outbound().is_empty().unwrap());
    assert_eq!(h.transport.gets().last().unwrap(), "/api/updates/0");
    h.engine.stop();
}

#[tokio::test(start_paused = true)]
async fn restart_resumes_from_persisted_cursor() {
    init_tracing();
    let store = InMemoryStore::new();
    let transport = Arc::new(MockTransport::new());
    let publisher = Arc::new(MemoryPublisher::new());
    let hooks = Arc::new(RecordingHooks::new());
    transport.push_get_response(Ok(Some(page(&[json!(1)], 5, false))));

    {
        let engine = SyncEngine::new(
            SyncConfig::default(),
            &store,
            transport.clone(),
            publisher.clone(),
            hooks.clone(),
        )
        .unwrap();
        engine.start();
        advance(15_100).await;
        engine.add(vec![json!("unsent")]).unwrap();
    }

    let engine = SyncEngine::new(
        SyncConfig::default(),
        &store,
        transport.clone(),
        publisher,
        hooks,
    )
    .unwrap();
    assert_eq!(engine.outbound().len().unwrap(), 1);
    engine.start();
    advance(15_100).await;
    assert_eq!(transport.gets().last().unwrap(), "/api/updates/5");
    assert!(engine.outbound().is_empty().unwrap());
    engine.stop();
}

#[tokio::test(start_paused = true)]
async fn remote_rows_are_materialized_through_publisher() {
    init_tracing();
    let store = InMemoryStore::new();
    let notes = store.open_table(&TableSchema::new("notes")).unwrap();
    let transport = Arc::new(MockTransport::new());
    let publisher: Arc<dyn Publisher> = Arc::new(KeyedTablePublisher {
        table: Arc::clone(&notes),
    });
    let engine = SyncEngine::new(
        SyncConfig::default(),
        &store,
        transport.clone(),
        publisher,
        Arc::new(RecordingHooks::new()),
    )
    .unwrap();

    transport.push_get_response(Ok(Some(page(
        &[json!({"key": "n1", "text": "v1"})],
        1,
        true,
    ))));
    transport.push_get_response(Ok(Some(page(
        &[json!({"key": "n1", "text": "v2"})],
        2,
        false,
    ))));

    engine.start();
    advance(16_100).await;

    assert_eq!(notes.len().unwrap(), 1);
    let row = notes.first().unwrap().unwrap();
    assert_eq!(row.value["text"], "v2");
    engine.stop();
}
