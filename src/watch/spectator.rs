//! Change notification engine.
//!
//! One watch loop runs per watched [`WatchKey`]. All loops feed a single bounded
//! queue drained by one dispatch task, which calls the listeners registered for the
//! notification's key in registration order. A full queue blocks the loops.

use std::collections::HashMap;
use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::watch_loop::LoopHandle;
use super::watch_loop::SnapshotSink;
use super::watch_loop::SubtreeDepth;
use super::watch_loop::WatchLoop;
use super::ChangeKind;
use super::Context;
use super::Listener;
use super::ListenerHandle;
use super::ListenerId;
use super::LoopState;
use super::Notification;
use super::WatchKey;
use crate::metrics::NOTIFICATIONS_DISPATCHED;
use crate::utils::async_task::spawn_task;
use crate::AdminError;
use crate::KeyBuilder;
use crate::Record;
use crate::Result;
use crate::ShutdownError;
use crate::StoreClient;
use crate::WatchConfig;
use crate::WatchError;

struct Registration {
    id: ListenerId,
    listener: Listener,
    context: Context,
}

/// Listener registry and active loops, guarded together.
#[derive(Default)]
struct Registry {
    listeners: HashMap<WatchKey, Vec<Registration>>,
    loops: HashMap<WatchKey, LoopHandle>,
    running: Option<Running>,
}

struct Running {
    queue: mpsc::Sender<Notification>,
    dispatcher: JoinHandle<()>,
    runtime: tokio::runtime::Handle,
    /// Parent of every loop token
    shutdown: CancellationToken,
}

struct Inner {
    keys: KeyBuilder,
    client: Arc<StoreClient>,
    config: WatchConfig,
    registry: Arc<Mutex<Registry>>,
    next_id: AtomicU64,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(running) = self.registry.lock().running.take() {
            running.shutdown.cancel();
        }
    }
}

/// Observer role: watches cluster state and fans changes out to listeners.
///
/// Clones share the same engine.
#[derive(Clone)]
pub struct Spectator {
    inner: Arc<Inner>,
}

struct QueueSink {
    key: WatchKey,
    queue: mpsc::Sender<Notification>,
}

#[async_trait]
impl SnapshotSink for QueueSink {
    async fn deliver(
        &self,
        records: Vec<Record>,
    ) -> bool {
        self.queue
            .send(Notification::new(&self.key, records))
            .await
            .is_ok()
    }
}

impl Spectator {
    pub fn new(
        cluster: &str,
        client: Arc<StoreClient>,
        config: WatchConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                keys: KeyBuilder::new(cluster),
                client,
                config,
                registry: Arc::new(Mutex::new(Registry::default())),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn cluster(&self) -> &str {
        self.inner.keys.cluster_name()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.registry.lock().running.is_some()
    }

    /// Starts the dispatcher and a watch loop for every key that already has listeners.
    pub async fn connect(&self) -> Result<()> {
        let cluster = self.cluster().to_string();
        if !self.inner.client.is_cluster_setup(&cluster).await? {
            return Err(AdminError::ClusterNotSetup(cluster).into());
        }

        let mut reg = self.inner.registry.lock();
        if reg.running.is_some() {
            return Err(WatchError::AlreadyConnected.into());
        }

        let (queue, rx) = mpsc::channel(self.inner.config.notification_queue_size);
        let dispatcher = spawn_task("notification-dispatcher", dispatch(self.inner.registry.clone(), rx));
        reg.running = Some(Running {
            queue,
            dispatcher,
            runtime: tokio::runtime::Handle::current(),
            shutdown: CancellationToken::new(),
        });

        let keys: Vec<WatchKey> = reg.listeners.keys().cloned().collect();
        for key in keys {
            self.start_loop(&mut reg, key);
        }
        info!(cluster = %cluster, "spectator connected");
        Ok(())
    }

    /// Registers `listener` for `kind` (scoped to `instance` for per-instance kinds).
    ///
    /// The first listener of a key starts its watch loop. Nothing is delivered until a
    /// watch fires after registration.
    pub fn add_listener<F>(
        &self,
        kind: ChangeKind,
        instance: Option<&str>,
        listener: F,
        context: Context,
    ) -> Result<ListenerHandle>
    where
        F: Fn(&Notification, &Context) + Send + Sync + 'static,
    {
        let key = WatchKey::new(kind, instance)?;
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));

        let mut reg = self.inner.registry.lock();
        let entries = reg.listeners.entry(key.clone()).or_default();
        entries.push(Registration {
            id,
            listener: Arc::new(listener),
            context,
        });
        let first = entries.len() == 1;
        if first && reg.running.is_some() {
            self.start_loop(&mut reg, key.clone());
        }
        debug!(key = %key, ?id, "listener added");
        Ok(ListenerHandle { key, id })
    }

    /// Removes a registration. Removing the last listener of a key stops its loop.
    ///
    /// Returns `false` if the handle was already removed.
    pub fn remove_listener(
        &self,
        handle: &ListenerHandle,
    ) -> bool {
        let mut reg = self.inner.registry.lock();
        let Some(entries) = reg.listeners.get_mut(&handle.key) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|r| r.id != handle.id);
        let removed = entries.len() != before;

        if entries.is_empty() {
            reg.listeners.remove(&handle.key);
            if let Some(l) = reg.loops.remove(&handle.key) {
                l.stop();
                info!(key = %handle.key, "last listener removed, watch loop stopping");
            }
        }
        removed
    }

    /// Keys with a running watch loop
    pub fn watched_keys(&self) -> Vec<WatchKey> {
        let mut keys: Vec<WatchKey> = self.inner.registry.lock().loops.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn loop_state(
        &self,
        key: &WatchKey,
    ) -> Option<LoopState> {
        self.inner.registry.lock().loops.get(key).map(LoopHandle::state)
    }

    /// Stops every loop and waits for the queue to drain.
    ///
    /// Listeners stay registered; a later [`Spectator::connect`] restarts their loops.
    /// Fails with [`ShutdownError::Timeout`] when loops or listeners do not finish within
    /// `watch.shutdown_timeout_ms`.
    pub async fn stop(&self) -> Result<()> {
        let (running, loops) = {
            let mut reg = self.inner.registry.lock();
            let Some(running) = reg.running.take() else {
                return Ok(());
            };
            let loops: Vec<LoopHandle> = reg.loops.drain().map(|(_, l)| l).collect();
            (running, loops)
        };

        running.shutdown.cancel();
        // loops hold the other senders; the dispatcher ends once all are gone
        drop(running.queue);

        let timeout = self.inner.config.shutdown_timeout();
        let dispatcher = running.dispatcher;
        let drained = tokio::time::timeout(timeout, async move {
            for l in loops {
                l.join().await;
            }
            dispatcher.await
        })
        .await;

        match drained {
            Ok(joined) => {
                joined.map_err(ShutdownError::from)?;
                info!(cluster = %self.cluster(), "spectator stopped");
                Ok(())
            }
            Err(_) => {
                warn!(cluster = %self.cluster(), ?timeout, "spectator did not stop in time");
                Err(ShutdownError::Timeout(timeout).into())
            }
        }
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.stop().await
    }

    fn start_loop(
        &self,
        reg: &mut Registry,
        key: WatchKey,
    ) {
        let Some(running) = reg.running.as_ref() else {
            return;
        };
        if reg.loops.contains_key(&key) {
            return;
        }
        let (root, depth) = self.subtree(&key);
        let watch_loop = WatchLoop {
            client: self.inner.client.clone(),
            root,
            depth,
            sink: QueueSink {
                key: key.clone(),
                queue: running.queue.clone(),
            },
            emit_initial: false,
            backoff: self.inner.client.retry_policies().store,
        };
        let handle = watch_loop.spawn(&running.runtime, running.shutdown.child_token());
        reg.loops.insert(key, handle);
    }

    fn subtree(
        &self,
        key: &WatchKey,
    ) -> (String, SubtreeDepth) {
        let keys = &self.inner.keys;
        let instance = key.instance.as_deref().unwrap_or_default();
        match key.kind {
            ChangeKind::ExternalView => (keys.external_view(), SubtreeDepth::Leaves),
            ChangeKind::LiveInstances => (keys.live_instances(), SubtreeDepth::Leaves),
            ChangeKind::IdealState => (keys.idealstates(), SubtreeDepth::Leaves),
            ChangeKind::InstanceConfig => (keys.participant_configs(), SubtreeDepth::Leaves),
            ChangeKind::ControllerMessages => (keys.controller_messages(), SubtreeDepth::Leaves),
            ChangeKind::CurrentState => (keys.current_states(instance), SubtreeDepth::Nested),
            ChangeKind::Messages => (keys.messages(instance), SubtreeDepth::Leaves),
        }
    }

    // -
    // Typed registration helpers

    pub fn add_external_view_listener<F>(
        &self,
        listener: F,
        context: Context,
    ) -> Result<ListenerHandle>
    where
        F: Fn(&[Record], &Context) + Send + Sync + 'static,
    {
        self.add_listener(
            ChangeKind::ExternalView,
            None,
            move |n, c| listener(n.records(), c),
            context,
        )
    }

    pub fn add_live_instance_listener<F>(
        &self,
        listener: F,
        context: Context,
    ) -> Result<ListenerHandle>
    where
        F: Fn(&[Record], &Context) + Send + Sync + 'static,
    {
        self.add_listener(
            ChangeKind::LiveInstances,
            None,
            move |n, c| listener(n.records(), c),
            context,
        )
    }

    pub fn add_ideal_state_listener<F>(
        &self,
        listener: F,
        context: Context,
    ) -> Result<ListenerHandle>
    where
        F: Fn(&[Record], &Context) + Send + Sync + 'static,
    {
        self.add_listener(
            ChangeKind::IdealState,
            None,
            move |n, c| listener(n.records(), c),
            context,
        )
    }

    pub fn add_instance_config_listener<F>(
        &self,
        listener: F,
        context: Context,
    ) -> Result<ListenerHandle>
    where
        F: Fn(&[Record], &Context) + Send + Sync + 'static,
    {
        self.add_listener(
            ChangeKind::InstanceConfig,
            None,
            move |n, c| listener(n.records(), c),
            context,
        )
    }

    pub fn add_controller_message_listener<F>(
        &self,
        listener: F,
        context: Context,
    ) -> Result<ListenerHandle>
    where
        F: Fn(&[Record], &Context) + Send + Sync + 'static,
    {
        self.add_listener(
            ChangeKind::ControllerMessages,
            None,
            move |n, c| listener(n.records(), c),
            context,
        )
    }

    pub fn add_current_state_listener<F>(
        &self,
        instance: &str,
        listener: F,
        context: Context,
    ) -> Result<ListenerHandle>
    where
        F: Fn(&str, &[Record], &Context) + Send + Sync + 'static,
    {
        self.add_listener(
            ChangeKind::CurrentState,
            Some(instance),
            move |n, c| listener(n.instance().unwrap_or_default(), n.records(), c),
            context,
        )
    }

    pub fn add_message_listener<F>(
        &self,
        instance: &str,
        listener: F,
        context: Context,
    ) -> Result<ListenerHandle>
    where
        F: Fn(&str, &[Record], &Context) + Send + Sync + 'static,
    {
        self.add_listener(
            ChangeKind::Messages,
            Some(instance),
            move |n, c| listener(n.instance().unwrap_or_default(), n.records(), c),
            context,
        )
    }
}

async fn dispatch(
    registry: Arc<Mutex<Registry>>,
    mut queue: mpsc::Receiver<Notification>,
) -> Result<()> {
    while let Some(notification) = queue.recv().await {
        let key = notification.key();
        let targets: Vec<(ListenerId, Listener, Context)> = registry
            .lock()
            .listeners
            .get(&key)
            .map(|entries| {
                entries
                    .iter()
                    .map(|r| (r.id, r.listener.clone(), r.context.clone()))
                    .collect()
            })
            .unwrap_or_default();

        if targets.is_empty() {
            debug!(key = %key, "no listeners left, dropping notification");
            continue;
        }

        for (id, listener, context) in targets {
            if catch_unwind(AssertUnwindSafe(|| listener(&notification, &context))).is_err() {
                error!(key = %key, ?id, "listener panicked");
            }
        }
        NOTIFICATIONS_DISPATCHED
            .with_label_values(&[key.kind.as_str()])
            .inc();
    }
    debug!("notification queue closed, dispatcher exiting");
    Ok(())
}
