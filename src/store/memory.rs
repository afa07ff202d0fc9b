use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::trace;

use super::CoordinationStore;
use super::CreateMode;
use super::NodeStat;
use super::StoreResult;
use super::WatchEvent;
use super::WatchHandle;
use super::ANY_VERSION;
use crate::utils::path;
use crate::StoreError;

#[derive(Debug)]
struct Node {
    data: Bytes,
    stat: NodeStat,
    /// Creation order
    children: Vec<String>,
}

#[derive(Debug)]
struct Watcher {
    session: u64,
    tx: oneshot::Sender<WatchEvent>,
}

#[derive(Debug)]
struct Tree {
    nodes: HashMap<String, Node>,
    /// Registered by `get_watch` and `exists_watch`
    data_watches: HashMap<String, Vec<Watcher>>,
    child_watches: HashMap<String, Vec<Watcher>>,
    live_sessions: HashSet<u64>,
    next_session: u64,
    next_seq: u64,
    transient_failures: usize,
}

impl Tree {
    fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            "/".to_string(),
            Node {
                data: Bytes::new(),
                stat: NodeStat::default(),
                children: Vec::new(),
            },
        );
        Self {
            nodes,
            data_watches: HashMap::new(),
            child_watches: HashMap::new(),
            live_sessions: HashSet::new(),
            next_session: 1,
            next_seq: 1,
            transient_failures: 0,
        }
    }

    fn open_session(&mut self) -> u64 {
        let id = self.next_session;
        self.next_session += 1;
        self.live_sessions.insert(id);
        id
    }

    /// Session and fault-injection gate every operation passes first.
    fn check(
        &mut self,
        session: u64,
        p: &str,
    ) -> StoreResult<()> {
        if !self.live_sessions.contains(&session) {
            return Err(StoreError::SessionExpired);
        }
        if self.transient_failures > 0 {
            self.transient_failures -= 1;
            return Err(StoreError::ConnectionLoss);
        }
        path::validate(p)
    }

    fn add_watch(
        watches: &mut HashMap<String, Vec<Watcher>>,
        p: &str,
        session: u64,
    ) -> WatchHandle {
        let (tx, rx) = oneshot::channel();
        let list = watches.entry(p.to_string()).or_default();
        list.retain(|w| !w.tx.is_closed());
        list.push(Watcher { session, tx });
        rx
    }

    fn fire(
        watches: &mut HashMap<String, Vec<Watcher>>,
        p: &str,
        event: WatchEvent,
    ) {
        if let Some(list) = watches.remove(p) {
            trace!(path = %p, ?event, count = list.len(), "firing watches");
            for w in list {
                let _ = w.tx.send(event);
            }
        }
    }

    fn create(
        &mut self,
        p: &str,
        data: Bytes,
        owner: Option<u64>,
    ) -> StoreResult<()> {
        if self.nodes.contains_key(p) {
            return Err(StoreError::AlreadyExists(p.to_string()));
        }
        let parent = path::parent(p).ok_or_else(|| StoreError::AlreadyExists(p.to_string()))?;
        let seq = self.next_seq;
        let parent_node = self
            .nodes
            .get_mut(parent)
            .ok_or_else(|| StoreError::NotFound(parent.to_string()))?;
        parent_node.children.push(path::name(p).to_string());

        self.next_seq += 1;
        self.nodes.insert(
            p.to_string(),
            Node {
                data,
                stat: NodeStat {
                    version: 0,
                    created_seq: seq,
                    ephemeral_owner: owner,
                },
                children: Vec::new(),
            },
        );

        Self::fire(&mut self.data_watches, p, WatchEvent::NodeCreated);
        Self::fire(&mut self.child_watches, parent, WatchEvent::ChildrenChanged);
        Ok(())
    }

    fn set(
        &mut self,
        p: &str,
        data: Bytes,
        version: i32,
    ) -> StoreResult<NodeStat> {
        let node = self
            .nodes
            .get_mut(p)
            .ok_or_else(|| StoreError::NotFound(p.to_string()))?;
        if version != ANY_VERSION && version != node.stat.version {
            return Err(StoreError::VersionConflict {
                path: p.to_string(),
                expected: version,
            });
        }
        node.data = data;
        node.stat.version += 1;
        let stat = node.stat;

        Self::fire(&mut self.data_watches, p, WatchEvent::DataChanged);
        Ok(stat)
    }

    fn delete(
        &mut self,
        p: &str,
        version: i32,
    ) -> StoreResult<()> {
        if p == "/" {
            return Err(StoreError::InvalidPath(p.to_string()));
        }
        let node = self.nodes.get(p).ok_or_else(|| StoreError::NotFound(p.to_string()))?;
        if version != ANY_VERSION && version != node.stat.version {
            return Err(StoreError::VersionConflict {
                path: p.to_string(),
                expected: version,
            });
        }
        if !node.children.is_empty() {
            return Err(StoreError::NotEmpty(p.to_string()));
        }

        self.nodes.remove(p);
        if let Some(parent) = path::parent(p) {
            let name = path::name(p);
            if let Some(parent_node) = self.nodes.get_mut(parent) {
                parent_node.children.retain(|c| c != name);
            }
            Self::fire(&mut self.child_watches, parent, WatchEvent::ChildrenChanged);
        }
        Self::fire(&mut self.data_watches, p, WatchEvent::NodeDeleted);
        Self::fire(&mut self.child_watches, p, WatchEvent::NodeDeleted);
        Ok(())
    }

    fn expire(
        &mut self,
        session: u64,
    ) {
        if !self.live_sessions.remove(&session) {
            return;
        }

        // watches of the dead session go first so they see Invalidated, not the deletes below
        for watches in [&mut self.data_watches, &mut self.child_watches] {
            for list in watches.values_mut() {
                let (dead, live): (Vec<_>, Vec<_>) = list.drain(..).partition(|w| w.session == session);
                *list = live;
                for w in dead {
                    let _ = w.tx.send(WatchEvent::Invalidated);
                }
            }
            watches.retain(|_, list| !list.is_empty());
        }

        let mut owned: Vec<(u64, String)> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.stat.ephemeral_owner == Some(session))
            .map(|(p, n)| (n.stat.created_seq, p.clone()))
            .collect();
        owned.sort();
        for (_, p) in owned {
            let _ = self.delete(&p, ANY_VERSION);
        }
        debug!(session, "session expired");
    }
}

/// In-process coordination store shared by any number of sessions.
///
/// Cloning yields another handle to the same tree.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    tree: Arc<Mutex<Tree>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tree: Arc::new(Mutex::new(Tree::new())),
        }
    }

    /// Opens a new session against the tree.
    pub fn connect(&self) -> MemorySession {
        let id = self.tree.lock().open_session();
        MemorySession {
            store: self.clone(),
            session: AtomicU64::new(id),
        }
    }

    /// Ends `session` as if its heartbeats stopped: outstanding watches of the
    /// session receive [`WatchEvent::Invalidated`] and its ephemeral nodes are removed.
    pub fn expire_session(
        &self,
        session: u64,
    ) {
        self.tree.lock().expire(session);
    }

    /// Makes the next `n` operations, from any session, fail with `ConnectionLoss`.
    pub fn inject_transient_failures(
        &self,
        n: usize,
    ) {
        self.tree.lock().transient_failures = n;
    }

    /// Number of nodes including the root
    pub fn node_count(&self) -> usize {
        self.tree.lock().nodes.len()
    }

    /// Watches still pending on `path` (data and children)
    pub fn pending_watches(
        &self,
        p: &str,
    ) -> usize {
        let tree = self.tree.lock();
        let count = |m: &HashMap<String, Vec<Watcher>>| {
            m.get(p)
                .map(|l| l.iter().filter(|w| !w.tx.is_closed()).count())
                .unwrap_or(0)
        };
        count(&tree.data_watches) + count(&tree.child_watches)
    }
}

/// One client connection to a [`MemoryStore`].
#[derive(Debug)]
pub struct MemorySession {
    store: MemoryStore,
    session: AtomicU64,
}

impl MemorySession {
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Closes the session, releasing its ephemeral nodes.
    pub fn close(&self) {
        self.store.expire_session(self.session_id());
    }
}

#[async_trait]
impl CoordinationStore for MemorySession {
    fn session_id(&self) -> u64 {
        self.session.load(Ordering::Acquire)
    }

    async fn exists(
        &self,
        p: &str,
    ) -> StoreResult<Option<NodeStat>> {
        let mut tree = self.store.tree.lock();
        tree.check(self.session_id(), p)?;
        Ok(tree.nodes.get(p).map(|n| n.stat))
    }

    async fn exists_watch(
        &self,
        p: &str,
    ) -> StoreResult<(Option<NodeStat>, WatchHandle)> {
        let session = self.session_id();
        let mut tree = self.store.tree.lock();
        tree.check(session, p)?;
        let stat = tree.nodes.get(p).map(|n| n.stat);
        let rx = Tree::add_watch(&mut tree.data_watches, p, session);
        Ok((stat, rx))
    }

    async fn get(
        &self,
        p: &str,
    ) -> StoreResult<(Bytes, NodeStat)> {
        let mut tree = self.store.tree.lock();
        tree.check(self.session_id(), p)?;
        let node = tree.nodes.get(p).ok_or_else(|| StoreError::NotFound(p.to_string()))?;
        Ok((node.data.clone(), node.stat))
    }

    async fn get_watch(
        &self,
        p: &str,
    ) -> StoreResult<(Bytes, NodeStat, WatchHandle)> {
        let session = self.session_id();
        let mut tree = self.store.tree.lock();
        tree.check(session, p)?;
        let (data, stat) = match tree.nodes.get(p) {
            Some(node) => (node.data.clone(), node.stat),
            None => return Err(StoreError::NotFound(p.to_string())),
        };
        let rx = Tree::add_watch(&mut tree.data_watches, p, session);
        Ok((data, stat, rx))
    }

    async fn children(
        &self,
        p: &str,
    ) -> StoreResult<Vec<String>> {
        let mut tree = self.store.tree.lock();
        tree.check(self.session_id(), p)?;
        let node = tree.nodes.get(p).ok_or_else(|| StoreError::NotFound(p.to_string()))?;
        Ok(node.children.clone())
    }

    async fn children_watch(
        &self,
        p: &str,
    ) -> StoreResult<(Vec<String>, WatchHandle)> {
        let session = self.session_id();
        let mut tree = self.store.tree.lock();
        tree.check(session, p)?;
        let children = match tree.nodes.get(p) {
            Some(node) => node.children.clone(),
            None => return Err(StoreError::NotFound(p.to_string())),
        };
        let rx = Tree::add_watch(&mut tree.child_watches, p, session);
        Ok((children, rx))
    }

    async fn create(
        &self,
        p: &str,
        data: Bytes,
        mode: CreateMode,
    ) -> StoreResult<()> {
        let session = self.session_id();
        let mut tree = self.store.tree.lock();
        tree.check(session, p)?;
        let owner = match mode {
            CreateMode::Persistent => None,
            CreateMode::Ephemeral => Some(session),
        };
        tree.create(p, data, owner)
    }

    async fn set(
        &self,
        p: &str,
        data: Bytes,
        version: i32,
    ) -> StoreResult<NodeStat> {
        let mut tree = self.store.tree.lock();
        tree.check(self.session_id(), p)?;
        tree.set(p, data, version)
    }

    async fn delete(
        &self,
        p: &str,
        version: i32,
    ) -> StoreResult<()> {
        let mut tree = self.store.tree.lock();
        tree.check(self.session_id(), p)?;
        tree.delete(p, version)
    }

    async fn reconnect(&self) -> StoreResult<u64> {
        let mut tree = self.store.tree.lock();
        let old = self.session.load(Ordering::Acquire);
        tree.expire(old);
        let id = tree.open_session();
        self.session.store(id, Ordering::Release);
        debug!(previous = old, session = id, "memory session reconnected");
        Ok(id)
    }
}
