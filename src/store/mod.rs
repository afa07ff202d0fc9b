//! Coordination store seam.
//!
//! [`CoordinationStore`] is the raw, single attempt view of a hierarchical store with
//! versioned nodes, ephemeral nodes and one-shot watches. [`StoreClient`] layers retry,
//! session recovery and record helpers on top. [`MemoryStore`] is an in-process
//! implementation of the full contract.

mod client;
mod memory;
pub use client::*;
pub use memory::*;

#[cfg(test)]
mod client_test;

use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)]
use mockall::automock;
use tokio::sync::oneshot;

use crate::StoreError;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Version accepted by `set`/`delete` to skip the conditional check
pub const ANY_VERSION: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    Persistent,
    /// Removed by the store once the creating session ends
    Ephemeral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeStat {
    /// Bumped by every successful `set`; starts at 0
    pub version: i32,
    /// Store-wide creation sequence, orders siblings
    pub created_seq: u64,
    /// Session owning an ephemeral node
    pub ephemeral_owner: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEvent {
    NodeCreated,
    NodeDeleted,
    DataChanged,
    ChildrenChanged,
    /// The session that registered the watch expired; nothing was observed
    Invalidated,
}

/// Fires at most once. Re-issue a read with watch to keep observing.
pub type WatchHandle = oneshot::Receiver<WatchEvent>;

/// A value together with the node version it was read at.
///
/// Pass `version` back to a conditional write to detect concurrent modification.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A fresh session replaced an expired one. Ephemeral nodes and watches
    /// of `previous` are gone.
    Reestablished { previous: u64, session_id: u64 },
}

/// Single-attempt primitives of the coordination store.
///
/// Implementations report connectivity problems as [`StoreError::ConnectionLoss`] or
/// [`StoreError::SessionExpired`] and never retry themselves.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    fn session_id(&self) -> u64;

    async fn exists(
        &self,
        path: &str,
    ) -> StoreResult<Option<NodeStat>>;

    /// Watch fires on create, delete or data change of `path`.
    async fn exists_watch(
        &self,
        path: &str,
    ) -> StoreResult<(Option<NodeStat>, WatchHandle)>;

    async fn get(
        &self,
        path: &str,
    ) -> StoreResult<(Bytes, NodeStat)>;

    async fn get_watch(
        &self,
        path: &str,
    ) -> StoreResult<(Bytes, NodeStat, WatchHandle)>;

    /// Child names in creation order.
    async fn children(
        &self,
        path: &str,
    ) -> StoreResult<Vec<String>>;

    async fn children_watch(
        &self,
        path: &str,
    ) -> StoreResult<(Vec<String>, WatchHandle)>;

    /// Fails with `NotFound` when the parent is missing and `AlreadyExists`
    /// when `path` is taken.
    async fn create(
        &self,
        path: &str,
        data: Bytes,
        mode: CreateMode,
    ) -> StoreResult<()>;

    async fn set(
        &self,
        path: &str,
        data: Bytes,
        version: i32,
    ) -> StoreResult<NodeStat>;

    async fn delete(
        &self,
        path: &str,
        version: i32,
    ) -> StoreResult<()>;

    /// Opens a new session after the current one expired, returning its id.
    async fn reconnect(&self) -> StoreResult<u64>;
}
