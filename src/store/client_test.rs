use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use tracing_test::traced_test;

use super::*;
use crate::constants::MAX_TREE_DELETE_PASSES;
use crate::test_utils::fast_retry;
use crate::test_utils::memory_client;
use crate::test_utils::record_with;
use crate::test_utils::setup_cluster;
use crate::BackoffPolicy;
use crate::ConflictPolicy;
use crate::Error;
use crate::Record;
use crate::RetryPolicies;
use crate::StoreError;

fn mock_client(mock: MockCoordinationStore) -> StoreClient {
    StoreClient::new(Arc::new(mock), fast_retry())
}

#[tokio::test]
#[traced_test]
async fn test_create_with_ancestors_on_empty_namespace() {
    let (_store, client) = memory_client();
    let record = record_with("h_1", &[("HELIX_HOST", "h")]);

    client
        .create_with_ancestors("/c/CONFIGS/PARTICIPANT/h_1", &record)
        .await
        .unwrap();

    for ancestor in ["/c", "/c/CONFIGS", "/c/CONFIGS/PARTICIPANT"] {
        assert!(client.get(ancestor).await.unwrap().is_empty(), "{ancestor} should be empty");
    }
    assert_eq!(
        client.get_record("/c/CONFIGS/PARTICIPANT/h_1").await.unwrap(),
        record
    );

    let err = client
        .create_with_ancestors("/c/CONFIGS/PARTICIPANT/h_1", &record)
        .await
        .unwrap_err();
    assert!(err.is_already_exists());
}

#[tokio::test]
async fn test_exists_all_short_circuits_on_first_absent_path() {
    let mut mock = MockCoordinationStore::new();
    mock.expect_session_id().return_const(1u64);
    mock.expect_exists()
        .withf(|p: &str| p == "/a")
        .times(1)
        .returning(|_| Ok(Some(NodeStat::default())));
    mock.expect_exists()
        .withf(|p: &str| p == "/b")
        .times(1)
        .returning(|_| Ok(None));
    mock.expect_exists().withf(|p: &str| p == "/c").never();

    let client = mock_client(mock);
    assert!(!client.exists_all(&["/a", "/b", "/c"]).await.unwrap());
}

#[tokio::test]
#[traced_test]
async fn test_transient_failures_are_invisible_to_callers() {
    let (store, client) = memory_client();
    client.create("/n", Bytes::from_static(b"v")).await.unwrap();

    store.inject_transient_failures(5);
    assert_eq!(client.get("/n").await.unwrap(), Bytes::from_static(b"v"));
    assert!(logs_contain("retrying"));
}

#[tokio::test]
async fn test_bounded_retry_policy_gives_up() {
    let mut mock = MockCoordinationStore::new();
    mock.expect_session_id().return_const(1u64);
    mock.expect_get()
        .times(3)
        .returning(|_| Err(StoreError::ConnectionLoss));

    let retry = RetryPolicies {
        store: BackoffPolicy {
            max_retries: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
        },
        conflict: ConflictPolicy::default(),
    };
    let client = StoreClient::new(Arc::new(mock), retry);

    match client.get("/n").await {
        Err(Error::Store(StoreError::RetryExhausted { attempts })) => assert_eq!(attempts, 3),
        other => panic!("expected RetryExhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn test_structural_errors_are_not_retried() {
    let mut mock = MockCoordinationStore::new();
    mock.expect_session_id().return_const(1u64);
    mock.expect_get()
        .times(1)
        .returning(|p| Err(StoreError::NotFound(p.to_string())));

    let client = mock_client(mock);
    assert!(client.get("/missing").await.unwrap_err().is_not_found());
}

#[tokio::test]
#[traced_test]
async fn test_expired_session_is_replaced_and_announced() {
    let (store, client) = memory_client();
    let mut events = client.subscribe_session_events();
    let first = client.session_id();

    store.expire_session(first);
    assert!(client.exists("/").await.unwrap());

    let second = client.session_id();
    assert_ne!(first, second);
    assert_eq!(
        events.recv().await.unwrap(),
        SessionEvent::Reestablished {
            previous: first,
            session_id: second
        }
    );
}

#[tokio::test]
async fn test_concurrent_expiry_reconnects_once() {
    let (store, client) = memory_client();
    let mut events = client.subscribe_session_events();
    store.expire_session(client.session_id());

    let (a, b) = tokio::join!(client.exists("/"), client.exists("/"));
    assert!(a.unwrap() && b.unwrap());

    events.recv().await.unwrap();
    assert!(events.try_recv().is_err(), "only one reconnect expected");
}

#[tokio::test]
async fn test_stale_set_is_rejected() {
    let (_store, client) = memory_client();
    client.create("/n", Bytes::from_static(b"a")).await.unwrap();
    let read = client.get_versioned("/n").await.unwrap();

    client
        .set("/n", Bytes::from_static(b"b"), read.version)
        .await
        .unwrap();
    let err = client
        .set("/n", Bytes::from_static(b"c"), read.version)
        .await
        .unwrap_err();
    assert!(err.is_version_conflict());
}

#[tokio::test]
async fn test_update_record_reapplies_mutation_after_conflict() {
    let base = record_with("r", &[("COUNT", "1")]).marshal().unwrap();
    let newer = record_with("r", &[("COUNT", "2")]).marshal().unwrap();

    let reads = Arc::new(AtomicUsize::new(0));
    let mut mock = MockCoordinationStore::new();
    mock.expect_session_id().return_const(1u64);
    let r = reads.clone();
    mock.expect_get().returning(move |_| {
        let n = r.fetch_add(1, Ordering::SeqCst);
        let stat = NodeStat {
            version: n as i32,
            ..Default::default()
        };
        if n == 0 {
            Ok((base.clone(), stat))
        } else {
            Ok((newer.clone(), stat))
        }
    });
    mock.expect_set().returning(|p, _, version| {
        if version == 0 {
            Err(StoreError::VersionConflict {
                path: p.to_string(),
                expected: version,
            })
        } else {
            Ok(NodeStat {
                version: version + 1,
                ..Default::default()
            })
        }
    });

    let client = mock_client(mock);
    let mut calls = 0;
    let written = client
        .update_record("/r", |rec| {
            calls += 1;
            let count: i64 = rec.get_int_field("COUNT").unwrap().unwrap();
            rec.set_int_field("COUNT", count + 10);
        })
        .await
        .unwrap();

    assert_eq!(calls, 2);
    assert_eq!(written.get_simple_field("COUNT"), Some("12"));
}

#[tokio::test]
async fn test_update_record_honours_conflict_bound() {
    let payload = Record::new("r").marshal().unwrap();
    let mut mock = MockCoordinationStore::new();
    mock.expect_session_id().return_const(1u64);
    mock.expect_get()
        .times(2)
        .returning(move |_| Ok((payload.clone(), NodeStat::default())));
    mock.expect_set().times(2).returning(|p, _, v| {
        Err(StoreError::VersionConflict {
            path: p.to_string(),
            expected: v,
        })
    });

    let mut retry = fast_retry();
    retry.conflict.max_attempts = Some(2);
    let client = StoreClient::new(Arc::new(mock), retry);

    match client.update_simple_field("/r", "K", "V").await {
        Err(Error::Store(StoreError::ConflictRetriesExhausted { path, attempts })) => {
            assert_eq!(path, "/r");
            assert_eq!(attempts, 2);
        }
        other => panic!("expected ConflictRetriesExhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn test_field_helpers_round_trip_through_the_store() {
    let (_store, client) = memory_client();
    client
        .create_with_ancestors("/c/cfg", &Record::new("cfg"))
        .await
        .unwrap();

    client
        .update_simple_field("/c/cfg", "allowParticipantAutoJoin", "TRUE")
        .await
        .unwrap();
    client
        .update_map_field("/c/cfg", "p_0", "CURRENT_STATE", "ONLINE")
        .await
        .unwrap();

    assert!(client
        .get_simple_field_bool("/c/cfg", "allowParticipantAutoJoin")
        .await
        .unwrap());
    assert!(!client.get_simple_field_bool("/c/cfg", "missing").await.unwrap());

    client.remove_map_field("/c/cfg", "p_0").await.unwrap();
    let record = client.get_record("/c/cfg").await.unwrap();
    assert!(record.get_map("p_0").is_none());
}

#[tokio::test]
async fn test_upsert_record_creates_then_updates() {
    let (_store, client) = memory_client();

    let created = client
        .upsert_record("/c/a/b", "b", |r| r.set_simple_field("K", "1"))
        .await
        .unwrap();
    assert_eq!(created.id, "b");

    client
        .upsert_record("/c/a/b", "b", |r| r.set_simple_field("L", "2"))
        .await
        .unwrap();
    let stored = client.get_record("/c/a/b").await.unwrap();
    assert_eq!(stored.get_simple_field("K"), Some("1"));
    assert_eq!(stored.get_simple_field("L"), Some("2"));

    // an empty placeholder is treated as a blank record
    client.create_empty("/c/a/empty").await.unwrap();
    let filled = client
        .upsert_record("/c/a/empty", "empty", |r| r.set_simple_field("K", "1"))
        .await
        .unwrap();
    assert_eq!(filled.id, "empty");
}

#[tokio::test]
async fn test_set_record_creates_or_overwrites() {
    let (_store, client) = memory_client();

    client
        .set_record("/x/y", &record_with("y", &[("A", "1")]))
        .await
        .unwrap();
    client
        .set_record("/x/y", &record_with("y", &[("B", "2")]))
        .await
        .unwrap();

    let stored = client.get_record("/x/y").await.unwrap();
    assert_eq!(stored.get_simple_field("A"), None);
    assert_eq!(stored.get_simple_field("B"), Some("2"));
}

#[tokio::test]
async fn test_delete_tree_removes_subtree_and_reports_absent_root() {
    let (store, client) = memory_client();
    for p in ["/t/a/1", "/t/a/2", "/t/b"] {
        client.ensure_path(p).await.unwrap();
    }
    client.ensure_path("/keep").await.unwrap();
    let before = store.node_count();

    client.delete_tree("/t").await.unwrap();

    assert!(!client.exists("/t").await.unwrap());
    assert!(client.exists("/keep").await.unwrap());
    assert_eq!(store.node_count(), before - 5);

    let err = client.delete_tree("/t").await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(store.node_count(), before - 5);
}

#[tokio::test]
async fn test_concurrent_delete_tree_leaves_no_orphans() {
    let (store, client) = memory_client();
    for i in 0..5 {
        for j in 0..5 {
            client.ensure_path(&format!("/t/{i}/{j}")).await.unwrap();
        }
    }

    let (a, b) = tokio::join!(client.delete_tree("/t"), client.delete_tree("/t"));
    assert!(a.is_ok() || b.is_ok());
    for r in [a, b] {
        if let Err(e) = r {
            assert!(e.is_not_found(), "unexpected error {e:?}");
        }
    }

    assert!(!client.exists("/t").await.unwrap());
    // only the root is left
    assert_eq!(store.node_count(), 1);
}

/// A store whose `/t` keeps a single child, renamed on every listing, as if a
/// sibling process recreated it between the listing and the delete of `/t`.
fn growing_tree_mock(
    root_delete: impl Fn(usize) -> StoreResult<()> + Send + 'static
) -> MockCoordinationStore {
    let mut mock = MockCoordinationStore::new();
    mock.expect_session_id().return_const(1u64);
    mock.expect_exists()
        .withf(|p: &str| p == "/t")
        .returning(|_| Ok(Some(NodeStat::default())));

    let listings = AtomicUsize::new(0);
    mock.expect_children().returning(move |p| {
        if p == "/t" {
            let n = listings.fetch_add(1, Ordering::SeqCst);
            Ok(vec![format!("c{n}")])
        } else {
            Ok(vec![])
        }
    });
    mock.expect_delete()
        .withf(|p: &str, _: &i32| p.starts_with("/t/c"))
        .returning(|_, _| Ok(()));

    let root_deletes = AtomicUsize::new(0);
    mock.expect_delete()
        .withf(|p: &str, _: &i32| p == "/t")
        .returning(move |_, _| root_delete(root_deletes.fetch_add(1, Ordering::SeqCst)));
    mock
}

#[tokio::test]
async fn test_delete_tree_relists_when_a_child_appears_mid_delete() {
    let mock = growing_tree_mock(|attempt| {
        if attempt == 0 {
            Err(StoreError::NotEmpty("/t".into()))
        } else {
            Ok(())
        }
    });
    let client = mock_client(mock);

    client.delete_tree("/t").await.unwrap();
}

#[tokio::test]
async fn test_delete_tree_gives_up_when_children_keep_appearing() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = attempts.clone();
    let mock = growing_tree_mock(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::NotEmpty("/t".into()))
    });
    let client = mock_client(mock);

    match client.delete_tree("/t").await {
        Err(Error::Store(StoreError::NotEmpty(path))) => assert_eq!(path, "/t"),
        other => panic!("expected NotEmpty, got {other:?}"),
    }
    assert_eq!(attempts.load(Ordering::SeqCst), MAX_TREE_DELETE_PASSES);
}

#[tokio::test]
async fn test_is_cluster_setup() {
    let (_store, client) = memory_client();
    assert!(!client.is_cluster_setup("c").await.unwrap());

    setup_cluster(&client, "c").await;
    assert!(client.is_cluster_setup("c").await.unwrap());
}
