use std::sync::Arc;
use std::time::Duration;

use crate::BackoffPolicy;
use crate::ClusterAdmin;
use crate::ConflictPolicy;
use crate::MemoryStore;
use crate::Record;
use crate::RetryPolicies;
use crate::StoreClient;

/// Unlimited retries with millisecond backoff so fault tests finish quickly
pub(crate) fn fast_retry() -> RetryPolicies {
    RetryPolicies {
        store: BackoffPolicy {
            max_retries: 0,
            base_delay_ms: 1,
            max_delay_ms: 5,
        },
        conflict: ConflictPolicy::default(),
    }
}

/// A fresh in-memory store plus a client on its own session.
pub(crate) fn memory_client() -> (MemoryStore, Arc<StoreClient>) {
    let store = MemoryStore::new();
    let client = client_for(&store);
    (store, client)
}

/// Another client, on a new session, against an existing store.
pub(crate) fn client_for(store: &MemoryStore) -> Arc<StoreClient> {
    Arc::new(StoreClient::new(Arc::new(store.connect()), fast_retry()))
}

pub(crate) async fn setup_cluster(
    client: &Arc<StoreClient>,
    cluster: &str,
) {
    ClusterAdmin::new(client.clone())
        .add_cluster(cluster)
        .await
        .expect("add_cluster should succeed");
}

pub(crate) fn record_with(
    id: &str,
    simple_fields: &[(&str, &str)],
) -> Record {
    let mut r = Record::new(id);
    for (k, v) in simple_fields {
        r.set_simple_field(*k, *v);
    }
    r
}

/// Polls `condition` every few milliseconds until it holds or `timeout` passes.
pub(crate) async fn wait_until<F>(
    timeout: Duration,
    mut condition: F,
) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
