use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

use super::watch_loop::*;
use crate::test_utils::client_for;
use crate::test_utils::memory_client;
use crate::test_utils::record_with;
use crate::test_utils::wait_until;
use crate::BackoffPolicy;
use crate::MemoryStore;
use crate::Record;
use crate::RetryPolicies;
use crate::StoreClient;

const WAIT: Duration = Duration::from_secs(2);

#[derive(Clone, Default)]
struct CollectingSink {
    snapshots: Arc<Mutex<Vec<Vec<Record>>>>,
    /// Pending watches on `watched_node` observed at each delivery
    watched_node: Option<(MemoryStore, String)>,
    armed_at_delivery: Arc<Mutex<Vec<usize>>>,
    close_after: Option<usize>,
}

impl CollectingSink {
    fn count(&self) -> usize {
        self.snapshots.lock().len()
    }

    fn last_ids(&self) -> Vec<String> {
        self.snapshots
            .lock()
            .last()
            .map(|s| s.iter().map(|r| r.id.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SnapshotSink for CollectingSink {
    async fn deliver(
        &self,
        records: Vec<Record>,
    ) -> bool {
        if let Some((store, path)) = &self.watched_node {
            self.armed_at_delivery.lock().push(store.pending_watches(path));
        }
        let mut snapshots = self.snapshots.lock();
        snapshots.push(records);
        self.close_after.map_or(true, |n| snapshots.len() < n)
    }
}

fn start(
    client: &Arc<StoreClient>,
    root: &str,
    depth: SubtreeDepth,
    sink: CollectingSink,
    emit_initial: bool,
) -> (LoopHandle, CancellationToken) {
    let stop = CancellationToken::new();
    let handle = WatchLoop {
        client: client.clone(),
        root: root.to_string(),
        depth,
        sink,
        emit_initial,
        backoff: client.retry_policies().store,
    }
    .spawn(&tokio::runtime::Handle::current(), stop.clone());
    (handle, stop)
}

async fn wait_for_state(
    handle: &LoopHandle,
    state: LoopState,
) -> bool {
    wait_until(WAIT, || handle.state() == state).await
}

#[tokio::test]
#[traced_test]
async fn test_initial_snapshot_is_silent_by_default() {
    let (_store, client) = memory_client();
    client
        .create_with_ancestors("/v/r1", &Record::new("r1"))
        .await
        .unwrap();

    let sink = CollectingSink::default();
    let (handle, _stop) = start(&client, "/v", SubtreeDepth::Leaves, sink.clone(), false);
    assert!(wait_for_state(&handle, LoopState::Watching).await);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(sink.count(), 0);

    client.create_record("/v/r2", &Record::new("r2")).await.unwrap();
    assert!(wait_until(WAIT, || sink.last_ids() == vec!["r1", "r2"]).await);
}

#[tokio::test]
async fn test_initial_snapshot_can_be_emitted() {
    let (_store, client) = memory_client();
    client
        .create_with_ancestors("/v/r1", &Record::new("r1"))
        .await
        .unwrap();

    let sink = CollectingSink::default();
    let (_handle, _stop) = start(&client, "/v", SubtreeDepth::Leaves, sink.clone(), true);

    assert!(wait_until(WAIT, || sink.count() == 1).await);
    assert_eq!(sink.last_ids(), vec!["r1"]);
}

#[tokio::test]
async fn test_absent_root_is_watched_until_created() {
    let (_store, client) = memory_client();
    let sink = CollectingSink::default();
    let (handle, _stop) = start(&client, "/later/root", SubtreeDepth::Leaves, sink.clone(), false);
    assert!(wait_for_state(&handle, LoopState::Watching).await);

    client
        .create_with_ancestors("/later/root/r1", &Record::new("r1"))
        .await
        .unwrap();

    assert!(wait_until(WAIT, || sink.last_ids() == vec!["r1"]).await);
}

#[tokio::test]
async fn test_nested_subtree_reports_grandchildren() {
    let (_store, client) = memory_client();
    client.ensure_path("/cs").await.unwrap();

    let sink = CollectingSink::default();
    let (handle, _stop) = start(&client, "/cs", SubtreeDepth::Nested, sink.clone(), false);
    assert!(wait_for_state(&handle, LoopState::Watching).await);

    client
        .create_with_ancestors("/cs/s1/db", &record_with("db", &[("SESSION_ID", "s1")]))
        .await
        .unwrap();
    assert!(wait_until(WAIT, || sink.last_ids() == vec!["db"]).await);

    // data change of a grandchild fires too
    client
        .update_map_field("/cs/s1/db", "db_0", "CURRENT_STATE", "ONLINE")
        .await
        .unwrap();
    assert!(
        wait_until(WAIT, || {
            sink.snapshots
                .lock()
                .last()
                .and_then(|s| s.first().cloned())
                .map(|r| r.get_map_field("db_0", "CURRENT_STATE") == Some("ONLINE"))
                .unwrap_or(false)
        })
        .await
    );
}

#[tokio::test]
async fn test_malformed_payload_is_skipped_and_loop_continues() {
    let (_store, client) = memory_client();
    client.ensure_path("/v").await.unwrap();

    let sink = CollectingSink::default();
    let (handle, _stop) = start(&client, "/v", SubtreeDepth::Leaves, sink.clone(), false);
    assert!(wait_for_state(&handle, LoopState::Watching).await);

    client
        .create("/v/bad", bytes::Bytes::from_static(b"{not json"))
        .await
        .unwrap();
    assert!(wait_until(WAIT, || sink.count() >= 1).await);
    assert!(sink.last_ids().is_empty());

    client.create_record("/v/good", &Record::new("good")).await.unwrap();
    assert!(wait_until(WAIT, || sink.last_ids() == vec!["good"]).await);
}

#[tokio::test]
async fn test_watch_is_rearmed_before_delivery() {
    let (store, client) = memory_client();
    client.ensure_path("/v").await.unwrap();

    let sink = CollectingSink {
        watched_node: Some((store.clone(), "/v".to_string())),
        ..Default::default()
    };
    let (handle, _stop) = start(&client, "/v", SubtreeDepth::Leaves, sink.clone(), false);
    assert!(wait_for_state(&handle, LoopState::Watching).await);

    client.create_record("/v/a", &Record::new("a")).await.unwrap();
    assert!(wait_until(WAIT, || sink.count() == 1).await);

    let armed = sink.armed_at_delivery.lock().clone();
    assert!(armed[0] >= 1, "root watch must be pending while delivering");
}

#[tokio::test]
async fn test_cancel_stops_the_loop() {
    let (_store, client) = memory_client();
    client.ensure_path("/v").await.unwrap();

    let sink = CollectingSink::default();
    let (handle, stop) = start(&client, "/v", SubtreeDepth::Leaves, sink.clone(), false);
    assert!(wait_for_state(&handle, LoopState::Watching).await);

    stop.cancel();
    assert!(wait_for_state(&handle, LoopState::Stopped).await);
    handle.join().await;

    client.create_record("/v/a", &Record::new("a")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(sink.count(), 0);
}

#[tokio::test]
async fn test_closed_sink_ends_the_loop() {
    let (_store, client) = memory_client();
    client.ensure_path("/v").await.unwrap();

    let sink = CollectingSink {
        close_after: Some(1),
        ..Default::default()
    };
    let (handle, _stop) = start(&client, "/v", SubtreeDepth::Leaves, sink.clone(), false);
    assert!(wait_for_state(&handle, LoopState::Watching).await);

    client.create_record("/v/a", &Record::new("a")).await.unwrap();
    assert!(wait_for_state(&handle, LoopState::Stopped).await);
}

#[tokio::test]
#[traced_test]
async fn test_loop_recovers_from_session_expiry() {
    let (store, client) = memory_client();
    let writer = client_for(&store);
    client.ensure_path("/v").await.unwrap();

    let sink = CollectingSink::default();
    let (handle, _stop) = start(&client, "/v", SubtreeDepth::Leaves, sink.clone(), false);
    assert!(wait_for_state(&handle, LoopState::Watching).await);

    let first_session = client.session_id();
    store.expire_session(first_session);
    assert!(wait_until(WAIT, || client.session_id() != first_session).await);
    assert!(wait_for_state(&handle, LoopState::Watching).await);

    writer.create_record("/v/a", &Record::new("a")).await.unwrap();
    assert!(wait_until(WAIT, || sink.last_ids() == vec!["a"]).await);
}

#[tokio::test]
async fn test_rearm_failures_back_off_with_the_given_policy() {
    let store = MemoryStore::new();
    let writer = client_for(&store);
    writer.ensure_path("/v").await.unwrap();
    // gives up on the first connection loss so the failure reaches the loop
    let client = Arc::new(StoreClient::new(
        Arc::new(store.connect()),
        RetryPolicies {
            store: BackoffPolicy {
                max_retries: 1,
                base_delay_ms: 1,
                max_delay_ms: 1,
            },
            ..Default::default()
        },
    ));

    let sink = CollectingSink::default();
    let stop = CancellationToken::new();
    let handle = WatchLoop {
        client,
        root: "/v".to_string(),
        depth: SubtreeDepth::Leaves,
        sink: sink.clone(),
        emit_initial: false,
        backoff: BackoffPolicy {
            max_retries: 0,
            base_delay_ms: 400,
            max_delay_ms: 400,
        },
    }
    .spawn(&tokio::runtime::Handle::current(), stop.clone());
    assert!(wait_for_state(&handle, LoopState::Watching).await);

    writer.create_record("/v/a", &Record::new("a")).await.unwrap();
    store.inject_transient_failures(1);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(handle.state(), LoopState::Refreshing);
    assert_eq!(sink.count(), 0);

    assert!(wait_until(WAIT, || sink.last_ids() == vec!["a"]).await);
}
