//! Retry and version protected access to a [`CoordinationStore`].
//!
//! Every primitive is retried with exponential backoff while the store reports
//! connectivity failures. An expired session is replaced once, under a lock, and
//! announced to [`SessionEvent`] subscribers before the failed operation is retried.
//! Only structural failures (`NotFound`, `AlreadyExists`, `VersionConflict`,
//! `NotEmpty`, malformed payloads) reach callers.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::broadcast;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::CoordinationStore;
use super::CreateMode;
use super::NodeStat;
use super::SessionEvent;
use super::StoreResult;
use super::Versioned;
use super::WatchHandle;
use super::ANY_VERSION;
use crate::constants::MAX_TREE_DELETE_PASSES;
use crate::metrics::STORE_RETRIES;
use crate::utils::backoff::ExponentialBackoff;
use crate::utils::path;
use crate::KeyBuilder;
use crate::Record;
use crate::Result;
use crate::RetryPolicies;
use crate::StoreError;

const SESSION_EVENT_CAPACITY: usize = 16;

pub struct StoreClient {
    store: Arc<dyn CoordinationStore>,
    retry: RetryPolicies,
    session_events: broadcast::Sender<SessionEvent>,
    reconnect_lock: Mutex<()>,
}

impl std::fmt::Debug for StoreClient {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("StoreClient")
            .field("session_id", &self.store.session_id())
            .field("retry", &self.retry)
            .finish()
    }
}

impl StoreClient {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        retry: RetryPolicies,
    ) -> Self {
        let (session_events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        Self {
            store,
            retry,
            session_events,
            reconnect_lock: Mutex::new(()),
        }
    }

    pub fn session_id(&self) -> u64 {
        self.store.session_id()
    }

    pub fn retry_policies(&self) -> &RetryPolicies {
        &self.retry
    }

    pub fn subscribe_session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.session_events.subscribe()
    }

    async fn with_retry<T, F, Fut>(
        &self,
        op: &'static str,
        target: &str,
        mut attempt: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut backoff = ExponentialBackoff::new(self.retry.store);
        loop {
            let session = self.store.session_id();
            let err = match attempt().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(e.into()),
            };

            if err == StoreError::SessionExpired {
                self.recover_session(session).await;
            }

            STORE_RETRIES.with_label_values(&[op]).inc();
            match backoff.next_delay() {
                Some(delay) => {
                    debug!(op, path = %target, attempt = backoff.attempts(), ?delay, "retrying after {}", err);
                    tokio::time::sleep(delay).await;
                }
                None => {
                    warn!(op, path = %target, "giving up after {} attempts: {}", backoff.attempts(), err);
                    return Err(StoreError::RetryExhausted {
                        attempts: backoff.attempts(),
                    }
                    .into());
                }
            }
        }
    }

    /// Replaces the session `observed` by a fresh one unless another caller already did.
    async fn recover_session(
        &self,
        observed: u64,
    ) {
        let _guard = self.reconnect_lock.lock().await;
        if self.store.session_id() != observed {
            return;
        }
        match self.store.reconnect().await {
            Ok(session_id) => {
                info!(previous = observed, session_id, "coordination store session re-established");
                let _ = self.session_events.send(SessionEvent::Reestablished {
                    previous: observed,
                    session_id,
                });
            }
            Err(e) => warn!(previous = observed, "reconnect failed: {}", e),
        }
    }

    // -
    // Primitives

    pub async fn exists(
        &self,
        path: &str,
    ) -> Result<bool> {
        Ok(self.stat(path).await?.is_some())
    }

    /// True when every path exists; stops at the first absent one.
    pub async fn exists_all<S: AsRef<str>>(
        &self,
        paths: &[S],
    ) -> Result<bool> {
        for p in paths {
            if !self.exists(p.as_ref()).await? {
                debug!(path = %p.as_ref(), "path does not exist");
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub async fn stat(
        &self,
        path: &str,
    ) -> Result<Option<NodeStat>> {
        self.with_retry("exists", path, || self.store.exists(path)).await
    }

    pub async fn exists_watch(
        &self,
        path: &str,
    ) -> Result<(Option<NodeStat>, WatchHandle)> {
        self.with_retry("exists_watch", path, || self.store.exists_watch(path))
            .await
    }

    pub async fn get(
        &self,
        path: &str,
    ) -> Result<Bytes> {
        Ok(self.get_versioned(path).await?.value)
    }

    pub async fn get_versioned(
        &self,
        path: &str,
    ) -> Result<Versioned<Bytes>> {
        let (value, stat) = self.with_retry("get", path, || self.store.get(path)).await?;
        Ok(Versioned {
            value,
            version: stat.version,
        })
    }

    /// Reads `path` and leaves a one-shot data watch on it.
    pub async fn get_watch(
        &self,
        path: &str,
    ) -> Result<(Versioned<Bytes>, WatchHandle)> {
        let (value, stat, watch) = self
            .with_retry("get_watch", path, || self.store.get_watch(path))
            .await?;
        Ok((
            Versioned {
                value,
                version: stat.version,
            },
            watch,
        ))
    }

    pub async fn children(
        &self,
        path: &str,
    ) -> Result<Vec<String>> {
        self.with_retry("children", path, || self.store.children(path)).await
    }

    pub async fn children_watch(
        &self,
        path: &str,
    ) -> Result<(Vec<String>, WatchHandle)> {
        self.with_retry("children_watch", path, || self.store.children_watch(path))
            .await
    }

    pub async fn create(
        &self,
        path: &str,
        data: Bytes,
    ) -> Result<()> {
        self.with_retry("create", path, || {
            self.store.create(path, data.clone(), CreateMode::Persistent)
        })
        .await
    }

    pub async fn create_empty(
        &self,
        path: &str,
    ) -> Result<()> {
        self.create(path, Bytes::new()).await
    }

    /// Creates a node owned by the current session.
    pub async fn create_ephemeral(
        &self,
        path: &str,
        data: Bytes,
    ) -> Result<()> {
        self.with_retry("create", path, || {
            self.store.create(path, data.clone(), CreateMode::Ephemeral)
        })
        .await
    }

    /// Conditional write against the version the caller last read.
    pub async fn set(
        &self,
        path: &str,
        data: Bytes,
        version: i32,
    ) -> Result<NodeStat> {
        self.with_retry("set", path, || self.store.set(path, data.clone(), version))
            .await
    }

    pub async fn delete(
        &self,
        path: &str,
        version: i32,
    ) -> Result<()> {
        self.with_retry("delete", path, || self.store.delete(path, version))
            .await
    }

    // -
    // Derived operations

    /// Creates `path` and every missing ancestor as empty nodes.
    pub async fn ensure_path(
        &self,
        path: &str,
    ) -> Result<()> {
        path::validate(path)?;
        for p in path::ancestors(path).into_iter().chain(std::iter::once(path)) {
            if self.exists(p).await? {
                continue;
            }
            match self.create_empty(p).await {
                Ok(()) => {}
                Err(e) if e.is_already_exists() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Creates every missing ancestor as an empty node, then `path` holding `record`.
    ///
    /// Fails with `AlreadyExists` if `path` itself is present.
    pub async fn create_with_ancestors(
        &self,
        path: &str,
        record: &Record,
    ) -> Result<()> {
        if let Some(parent) = path::parent(path) {
            if parent != "/" {
                self.ensure_path(parent).await?;
            }
        }
        self.create_record(path, record).await
    }

    /// Creates `path` holding `record`; the parent must exist.
    pub async fn create_record(
        &self,
        path: &str,
        record: &Record,
    ) -> Result<()> {
        self.create(path, record.marshal()?).await
    }

    /// Deletes `path` and everything below it.
    ///
    /// Fails with `NotFound` when `path` is absent up front. Nodes that vanish while the
    /// walk is under way are skipped. A node that keeps gaining children is relisted a
    /// bounded number of times before `NotEmpty` is returned; retrying the call is safe.
    pub async fn delete_tree(
        &self,
        path: &str,
    ) -> Result<()> {
        if !self.exists(path).await? {
            return Err(StoreError::NotFound(path.to_string()).into());
        }
        self.delete_subtree(path).await
    }

    fn delete_subtree<'a>(
        &'a self,
        path: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            for pass in 0..MAX_TREE_DELETE_PASSES {
                let children = match self.children(path).await {
                    Ok(c) => c,
                    Err(e) if e.is_not_found() => return Ok(()),
                    Err(e) => return Err(e),
                };
                for child in children {
                    let child_path = path::join(path, &child);
                    self.delete_subtree(&child_path).await?;
                }
                match self.delete(path, ANY_VERSION).await {
                    Ok(()) => return Ok(()),
                    Err(e) if e.is_not_found() => return Ok(()),
                    Err(e) if e.is_not_empty() => {
                        debug!(path = %path, pass, "children appeared during delete, relisting");
                    }
                    Err(e) => return Err(e),
                }
            }
            warn!(path = %path, "subtree kept growing while being deleted");
            Err(StoreError::NotEmpty(path.to_string()).into())
        }
        .boxed()
    }

    // -
    // Record helpers

    pub async fn get_record(
        &self,
        path: &str,
    ) -> Result<Record> {
        let data = self.get(path).await?;
        Record::unmarshal_at(path, &data)
    }

    pub async fn get_record_versioned(
        &self,
        path: &str,
    ) -> Result<Versioned<Record>> {
        let v = self.get_versioned(path).await?;
        Ok(Versioned {
            value: Record::unmarshal_at(path, &v.value)?,
            version: v.version,
        })
    }

    /// Reads a record and leaves a data watch on its node.
    ///
    /// The watch stays registered even when decoding fails.
    pub async fn get_record_watch(
        &self,
        path: &str,
    ) -> Result<(Record, WatchHandle)> {
        let (v, watch) = self.get_watch(path).await?;
        Ok((Record::unmarshal_at(path, &v.value)?, watch))
    }

    /// Writes `record` at `path`, creating the node and its ancestors when missing.
    pub async fn set_record(
        &self,
        path: &str,
        record: &Record,
    ) -> Result<()> {
        let data = record.marshal()?;
        let mut attempts = 0;
        loop {
            attempts += 1;
            let current = match self.get_versioned(path).await {
                Ok(v) => v,
                Err(e) if e.is_not_found() => match self.create_with_ancestors(path, record).await {
                    Ok(()) => return Ok(()),
                    Err(e) if e.is_already_exists() => continue,
                    Err(e) => return Err(e),
                },
                Err(e) => return Err(e),
            };
            match self.set(path, data.clone(), current.version).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_version_conflict() => self.check_conflict_bound(path, attempts)?,
                Err(e) => return Err(e),
            }
        }
    }

    /// Read-modify-write of the record at `path`.
    ///
    /// `mutate` is re-applied to a freshly read record after every version conflict, so
    /// it must compute its change from the record it is given.
    pub async fn update_record<F>(
        &self,
        path: &str,
        mut mutate: F,
    ) -> Result<Record>
    where
        F: FnMut(&mut Record) + Send,
    {
        self.modify_existing(path, None, &mut mutate).await
    }

    /// Like [`StoreClient::update_record`], but creates the record (id `id`, with its
    /// ancestors) when `path` is absent. An empty placeholder node counts as `Record::new(id)`.
    pub async fn upsert_record<F>(
        &self,
        path: &str,
        id: &str,
        mut mutate: F,
    ) -> Result<Record>
    where
        F: FnMut(&mut Record) + Send,
    {
        loop {
            if !self.exists(path).await? {
                let mut record = Record::new(id);
                mutate(&mut record);
                match self.create_with_ancestors(path, &record).await {
                    Ok(()) => return Ok(record),
                    Err(e) if e.is_already_exists() => continue,
                    Err(e) => return Err(e),
                }
            }
            match self.modify_existing(path, Some(id), &mut mutate).await {
                Err(e) if e.is_not_found() => continue,
                other => return other,
            }
        }
    }

    async fn modify_existing<F>(
        &self,
        path: &str,
        empty_as: Option<&str>,
        mutate: &mut F,
    ) -> Result<Record>
    where
        F: FnMut(&mut Record) + Send,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let current = self.get_versioned(path).await?;
            let mut record = match empty_as {
                Some(id) if current.value.is_empty() => Record::new(id),
                _ => Record::unmarshal_at(path, &current.value)?,
            };
            mutate(&mut record);

            match self.set(path, record.marshal()?, current.version).await {
                Ok(_) => return Ok(record),
                Err(e) if e.is_version_conflict() => self.check_conflict_bound(path, attempts)?,
                Err(e) => return Err(e),
            }
        }
    }

    fn check_conflict_bound(
        &self,
        path: &str,
        attempts: usize,
    ) -> Result<()> {
        match self.retry.conflict.max_attempts {
            Some(max) if attempts >= max => Err(StoreError::ConflictRetriesExhausted {
                path: path.to_string(),
                attempts,
            }
            .into()),
            _ => {
                debug!(path = %path, attempts, "version conflict, re-reading");
                Ok(())
            }
        }
    }

    pub async fn update_simple_field(
        &self,
        path: &str,
        key: &str,
        value: &str,
    ) -> Result<()> {
        self.update_record(path, |r| r.set_simple_field(key, value))
            .await
            .map(|_| ())
    }

    pub async fn update_map_field(
        &self,
        path: &str,
        key: &str,
        subkey: &str,
        value: &str,
    ) -> Result<()> {
        self.update_record(path, |r| r.set_map_field(key, subkey, value))
            .await
            .map(|_| ())
    }

    pub async fn remove_map_field(
        &self,
        path: &str,
        key: &str,
    ) -> Result<()> {
        self.update_record(path, |r| {
            r.remove_map_field(key);
        })
        .await
        .map(|_| ())
    }

    pub async fn get_simple_field(
        &self,
        path: &str,
        key: &str,
    ) -> Result<Option<String>> {
        let record = self.get_record(path).await?;
        Ok(record.get_simple_field(key).map(str::to_string))
    }

    /// `true` only when the field reads `true` in any case; absent counts as `false`.
    pub async fn get_simple_field_bool(
        &self,
        path: &str,
        key: &str,
    ) -> Result<bool> {
        Ok(self
            .get_simple_field(path, key)
            .await?
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false))
    }

    pub async fn is_cluster_setup(
        &self,
        cluster: &str,
    ) -> Result<bool> {
        self.exists_all(&KeyBuilder::new(cluster).cluster_skeleton())
            .await
    }
}
