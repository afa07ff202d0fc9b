//! Participant executor.
//!
//! `connect` registers the liveness node and starts a watch loop over the participant's
//! `MESSAGES` subtree. Every snapshot goes to a router task that hands each new message to
//! the worker for its partition, so one partition's transitions run strictly in arrival
//! order while different partitions proceed independently.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::Message;
use super::MessageKind;
use super::StateModel;
use super::TransitionRequest;
use crate::metrics::TRANSITIONS;
use crate::utils::async_task::spawn_task;
use crate::watch::watch_loop::LoopHandle;
use crate::watch::watch_loop::SnapshotSink;
use crate::watch::watch_loop::SubtreeDepth;
use crate::watch::watch_loop::WatchLoop;
use crate::AdminError;
use crate::ClusterAdmin;
use crate::InstanceConfig;
use crate::KeyBuilder;
use crate::ParticipantConfig;
use crate::ParticipantError;
use crate::Record;
use crate::Result;
use crate::SessionEvent;
use crate::StoreClient;
use crate::ALLOW_PARTICIPANT_AUTO_JOIN;
use crate::CLIENT_VERSION;
use crate::CURRENT_STATE;
use crate::ERROR;
use crate::FROM_STATE;
use crate::HELIX_VERSION;
use crate::LIVE_INSTANCE;
use crate::MSG_ID;
use crate::SESSION_ID;
use crate::STATE_MODEL_DEF;
use crate::TO_STATE;

/// Runs before anything touches the store in [`Participant::connect`].
pub type PreConnectCallback = Box<dyn Fn() + Send + Sync>;

/// Processing status of a message id that is still visible in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageStatus {
    /// Queued on or running in a partition worker
    InFlight,
    /// Executed and deleted; a stale snapshot may still list it
    Acked,
    /// Left in the store for external intervention
    Parked,
}

type StatusTable = Arc<DashMap<String, MessageStatus>>;

/// `(resource, partition)`
type PartitionKey = (String, String);

struct Running {
    shutdown: CancellationToken,
    messages: LoopHandle,
    router: JoinHandle<()>,
    monitor: JoinHandle<()>,
}

struct Inner {
    keys: KeyBuilder,
    id: String,
    host: String,
    port: u16,
    client: Arc<StoreClient>,
    config: ParticipantConfig,
    models: RwLock<HashMap<String, Arc<StateModel>>>,
    pre_connect: Mutex<Vec<PreConnectCallback>>,
    live_instance_info: Mutex<Option<String>>,
    /// Last state reached per resource partition
    states: Mutex<HashMap<PartitionKey, String>>,
    connected: AtomicBool,
    running: tokio::sync::Mutex<Option<Running>>,
}

/// A live cluster member executing state transitions on command.
///
/// Clones share the same executor. Background tasks run until [`Participant::disconnect`].
#[derive(Clone)]
pub struct Participant {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Participant {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Participant")
            .field("cluster", &self.cluster())
            .field("id", &self.inner.id)
            .finish()
    }
}

impl Participant {
    pub fn new(
        cluster: &str,
        host: &str,
        port: u16,
        client: Arc<StoreClient>,
        config: ParticipantConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                keys: KeyBuilder::new(cluster),
                id: format!("{host}_{port}"),
                host: host.to_string(),
                port,
                client,
                config,
                models: RwLock::new(HashMap::new()),
                pre_connect: Mutex::new(Vec::new()),
                live_instance_info: Mutex::new(None),
                states: Mutex::new(HashMap::new()),
                connected: AtomicBool::new(false),
                running: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn cluster(&self) -> &str {
        self.inner.keys.cluster_name()
    }

    /// `host_port`
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Registers `model` under its name, replacing an earlier registration.
    ///
    /// Models are fixed once connected.
    pub fn register_state_model(
        &self,
        model: StateModel,
    ) -> Result<()> {
        if self.is_connected() {
            return Err(ParticipantError::AlreadyConnected.into());
        }
        let name = model.name().to_string();
        if self
            .inner
            .models
            .write()
            .insert(name.clone(), Arc::new(model))
            .is_some()
        {
            debug!(model = %name, "state model replaced");
        }
        Ok(())
    }

    pub fn add_pre_connect_callback<F>(
        &self,
        callback: F,
    ) where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.pre_connect.lock().push(Box::new(callback));
    }

    /// Value advertised as `LIVE_INSTANCE` in the liveness record; defaults to the id.
    pub fn set_live_instance_info(
        &self,
        info: impl Into<String>,
    ) {
        *self.inner.live_instance_info.lock() = Some(info.into());
    }

    /// Last state this participant moved `partition` of `resource` to, if any.
    pub fn current_state(
        &self,
        resource: &str,
        partition: &str,
    ) -> Option<String> {
        self.inner
            .states
            .lock()
            .get(&(resource.to_string(), partition.to_string()))
            .cloned()
    }

    /// Joins the cluster: registers liveness and starts executing messages.
    ///
    /// Fails with [`ParticipantError::AlreadyLive`] if another session holds this
    /// participant's liveness node.
    pub async fn connect(&self) -> Result<()> {
        let mut running = self.inner.running.lock().await;
        if running.is_some() {
            return Err(ParticipantError::AlreadyConnected.into());
        }

        for callback in self.inner.pre_connect.lock().iter() {
            callback();
        }

        let client = &self.inner.client;
        let cluster = self.cluster().to_string();
        if !client.is_cluster_setup(&cluster).await? {
            return Err(AdminError::ClusterNotSetup(cluster).into());
        }
        self.join_cluster().await?;

        // subscribe before the liveness write so no re-establishment is missed
        let session_events = client.subscribe_session_events();
        self.inner.register_liveness().await?;

        let shutdown = CancellationToken::new();
        let (snapshot_tx, snapshot_rx) = mpsc::channel(self.inner.config.partition_queue_size);
        let router = spawn_task(
            "participant-router",
            route(self.inner.clone(), snapshot_rx, shutdown.clone()),
        );
        let messages = WatchLoop {
            client: client.clone(),
            root: self.inner.keys.messages(&self.inner.id),
            depth: SubtreeDepth::Leaves,
            sink: MessageSink { tx: snapshot_tx },
            emit_initial: true,
            backoff: client.retry_policies().store,
        }
        .spawn(&tokio::runtime::Handle::current(), shutdown.child_token());
        let monitor = spawn_task(
            "participant-session-monitor",
            monitor_sessions(self.inner.clone(), session_events, shutdown.clone()),
        );

        *running = Some(Running {
            shutdown,
            messages,
            router,
            monitor,
        });
        self.inner.connected.store(true, Ordering::Release);
        info!(cluster = %self.cluster(), id = %self.inner.id, "participant connected");
        Ok(())
    }

    /// Stops message processing and removes the liveness node if this session still owns it.
    pub async fn disconnect(&self) -> Result<()> {
        let Some(running) = self.inner.running.lock().await.take() else {
            return Err(ParticipantError::NotConnected.into());
        };
        self.inner.connected.store(false, Ordering::Release);

        running.shutdown.cancel();
        running.messages.join().await;
        running.router.await?;
        running.monitor.await?;

        let client = &self.inner.client;
        let path = self.inner.keys.live_instance(&self.inner.id);
        if let Some(stat) = client.stat(&path).await? {
            if stat.ephemeral_owner == Some(client.session_id()) {
                match client.delete(&path, stat.version).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
        }
        info!(cluster = %self.cluster(), id = %self.inner.id, "participant disconnected");
        Ok(())
    }

    /// Makes sure the participant config and instance subtree exist, auto-joining when
    /// the cluster allows it.
    async fn join_cluster(&self) -> Result<()> {
        let client = &self.inner.client;
        let keys = &self.inner.keys;
        let id = &self.inner.id;

        if !client.exists(&keys.participant_config(id)).await? {
            let allowed = self.inner.config.auto_join
                && client
                    .get_simple_field_bool(&keys.cluster_config(), ALLOW_PARTICIPANT_AUTO_JOIN)
                    .await?;
            if !allowed {
                return Err(ParticipantError::InstanceNotConfigured(id.clone()).into());
            }

            info!(cluster = %self.cluster(), id = %id, "auto joining cluster");
            let admin = ClusterAdmin::new(client.clone());
            let instance = InstanceConfig::new(&self.inner.host, self.inner.port);
            match admin.add_instance(self.cluster(), &instance).await {
                Ok(()) => {}
                Err(e) if e.is_already_exists() => {}
                Err(e) => return Err(e),
            }
        }

        for path in keys.instance_skeleton(id) {
            client.ensure_path(&path).await?;
        }
        Ok(())
    }
}

impl Inner {
    fn liveness_record(&self) -> Record {
        let mut record = Record::new(&self.id);
        record.set_simple_field(HELIX_VERSION, CLIENT_VERSION);
        record.set_simple_field(SESSION_ID, self.client.session_id().to_string());
        let info = self
            .live_instance_info
            .lock()
            .clone()
            .unwrap_or_else(|| self.id.clone());
        record.set_simple_field(LIVE_INSTANCE, info);
        record
    }

    /// Creates the ephemeral liveness node under the current session.
    ///
    /// A node already owned by this session counts as success.
    async fn register_liveness(&self) -> Result<()> {
        let path = self.keys.live_instance(&self.id);
        let data = self.liveness_record().marshal()?;
        match self.client.create_ephemeral(&path, data).await {
            Ok(()) => {
                debug!(path = %path, session = self.client.session_id(), "liveness registered");
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                let owner = self.client.stat(&path).await?.and_then(|s| s.ephemeral_owner);
                if owner == Some(self.client.session_id()) {
                    Ok(())
                } else {
                    Err(ParticipantError::AlreadyLive(self.id.clone()).into())
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Executes one message and reports the status it ends in.
    async fn process(
        &self,
        message: Message,
    ) -> MessageStatus {
        let result = match message.kind {
            MessageKind::Other(msg_type) => {
                debug!(id = %message.id, msg_type = %msg_type, "ignoring non transition message");
                self.acknowledge(&message.id).await
            }
            MessageKind::StateTransition(request) => self.transition(request).await,
        };
        match result {
            Ok(status) => status,
            Err(e) => {
                error!(id = %message.id, "message processing failed, leaving it in place: {}", e);
                MessageStatus::Parked
            }
        }
    }

    async fn transition(
        &self,
        request: TransitionRequest,
    ) -> Result<MessageStatus> {
        let key = (request.resource.clone(), request.partition.clone());
        let from = self
            .states
            .lock()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| self.config.initial_state.clone());
        if let Some(claimed) = &request.from_state {
            if *claimed != from {
                debug!(
                    resource = %request.resource,
                    partition = %request.partition,
                    claimed = %claimed,
                    tracked = %from,
                    "message from state differs from tracked state"
                );
            }
        }

        let model = self.models.read().get(&request.state_model).cloned();
        let handler = match model {
            None => Err(ParticipantError::UnknownStateModel(request.state_model.clone())),
            Some(m) => m
                .transition(&from, &request.to_state)
                .ok_or_else(|| ParticipantError::NoSuchTransition {
                    model: request.state_model.clone(),
                    from: from.clone(),
                    to: request.to_state.clone(),
                }),
        };
        let handler = match handler {
            Ok(h) => h,
            Err(e) => {
                warn!(id = %request.msg_id, partition = %request.partition, "{}", e);
                TRANSITIONS
                    .with_label_values(&[request.state_model.as_str(), "rejected"])
                    .inc();
                self.report_error(&request, &from, &e.to_string()).await?;
                return Ok(MessageStatus::Parked);
            }
        };

        trace!(partition = %request.partition, from = %from, to = %request.to_state, "running transition");
        let req = request.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || handler(&req)).await {
            let failure = ParticipantError::TransitionFailed {
                partition: request.partition.clone(),
                reason: if e.is_panic() {
                    "handler panicked".into()
                } else {
                    e.to_string()
                },
            };
            error!(id = %request.msg_id, "{}", failure);
            TRANSITIONS
                .with_label_values(&[request.state_model.as_str(), "failed"])
                .inc();
            self.report_error(&request, &from, &failure.to_string()).await?;
            return Ok(MessageStatus::Parked);
        }

        self.states.lock().insert(key, request.to_state.clone());
        self.write_current_state(&request).await?;
        TRANSITIONS
            .with_label_values(&[request.state_model.as_str(), "ok"])
            .inc();
        debug!(
            partition = %request.partition,
            from = %from,
            to = %request.to_state,
            "transition complete"
        );
        self.acknowledge(&request.msg_id).await
    }

    async fn write_current_state(
        &self,
        request: &TransitionRequest,
    ) -> Result<()> {
        let session = self.client.session_id().to_string();
        let path = self
            .keys
            .current_state_for_resource(&self.id, &session, &request.resource);
        self.client
            .upsert_record(&path, &request.resource, |r| {
                r.set_simple_field(SESSION_ID, session.as_str());
                r.set_simple_field(STATE_MODEL_DEF, request.state_model.as_str());
                r.set_map_field(&request.partition, CURRENT_STATE, &request.to_state);
            })
            .await
            .map(|_| ())
    }

    async fn report_error(
        &self,
        request: &TransitionRequest,
        from: &str,
        reason: &str,
    ) -> Result<()> {
        let session = self.client.session_id().to_string();
        let path = self
            .keys
            .errors_for_resource(&self.id, &session, &request.resource);
        self.client
            .upsert_record(&path, &request.resource, |r| {
                r.set_map_field(&request.partition, MSG_ID, &request.msg_id);
                r.set_map_field(&request.partition, FROM_STATE, from);
                r.set_map_field(&request.partition, TO_STATE, &request.to_state);
                r.set_map_field(&request.partition, ERROR, reason);
            })
            .await
            .map(|_| ())
    }

    /// Deletes the message node.
    async fn acknowledge(
        &self,
        msg_id: &str,
    ) -> Result<MessageStatus> {
        let path = self.keys.message(&self.id, msg_id);
        if let Some(stat) = self.client.stat(&path).await? {
            match self.client.delete(&path, stat.version).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(MessageStatus::Acked)
    }
}

struct MessageSink {
    tx: mpsc::Sender<Vec<Record>>,
}

#[async_trait]
impl SnapshotSink for MessageSink {
    async fn deliver(
        &self,
        records: Vec<Record>,
    ) -> bool {
        self.tx.send(records).await.is_ok()
    }
}

/// Fans message snapshots out to per-partition workers.
async fn route(
    inner: Arc<Inner>,
    mut snapshots: mpsc::Receiver<Vec<Record>>,
    shutdown: CancellationToken,
) -> Result<()> {
    let statuses: StatusTable = Arc::new(DashMap::new());
    let mut workers: HashMap<PartitionKey, mpsc::Sender<Message>> = HashMap::new();
    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    loop {
        let records = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = snapshots.recv() => match next {
                Some(records) => records,
                None => break,
            },
        };

        let visible: HashSet<String> = records.iter().map(|r| r.id.clone()).collect();
        statuses.retain(|id, status| *status == MessageStatus::InFlight || visible.contains(id));

        for record in records {
            if statuses.contains_key(&record.id) {
                continue;
            }
            let message = match Message::from_record(&record) {
                Ok(m) => m,
                Err(e) => {
                    warn!("parking unreadable message: {}", e);
                    statuses.insert(record.id, MessageStatus::Parked);
                    continue;
                }
            };

            let lane = match &message.kind {
                MessageKind::StateTransition(req) => (req.resource.clone(), req.partition.clone()),
                MessageKind::Other(_) => (String::new(), String::new()),
            };
            let worker = workers.entry(lane.clone()).or_insert_with(|| {
                let (tx, rx) = mpsc::channel(inner.config.partition_queue_size);
                handles.push(tokio::spawn(run_partition(
                    inner.clone(),
                    rx,
                    statuses.clone(),
                    shutdown.clone(),
                )));
                trace!(resource = %lane.0, partition = %lane.1, "partition worker started");
                tx
            });

            statuses.insert(message.id.clone(), MessageStatus::InFlight);
            let id = message.id.clone();
            let sent = tokio::select! {
                biased;
                _ = shutdown.cancelled() => false,
                r = worker.send(message) => r.is_ok(),
            };
            if !sent {
                statuses.remove(&id);
                break;
            }
        }
    }

    drop(workers);
    for h in handles {
        if let Err(e) = h.await {
            warn!("partition worker failed: {:?}", e);
        }
    }
    debug!(id = %inner.id, "message router stopped");
    Ok(())
}

/// Executes one partition's messages in arrival order.
///
/// Stops between messages once `shutdown` fires; messages still queued stay in the
/// store unacknowledged.
async fn run_partition(
    inner: Arc<Inner>,
    mut queue: mpsc::Receiver<Message>,
    statuses: StatusTable,
    shutdown: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = queue.recv() => match next {
                Some(m) => m,
                None => break,
            },
        };
        let id = message.id.clone();
        let status = inner.process(message).await;
        statuses.insert(id, status);
    }
    trace!(id = %inner.id, "partition worker stopped");
}

/// Recreates the liveness node after the client re-established an expired session.
async fn monitor_sessions(
    inner: Arc<Inner>,
    mut events: broadcast::Receiver<SessionEvent>,
    shutdown: CancellationToken,
) -> Result<()> {
    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(()),
            e = events.recv() => e,
        };
        match event {
            Ok(SessionEvent::Reestablished { previous, session_id }) => {
                info!(id = %inner.id, previous, session_id, "session re-established, restoring liveness");
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(id = %inner.id, "missed {} session events, restoring liveness", n);
            }
            Err(broadcast::error::RecvError::Closed) => return Ok(()),
        }
        if let Err(e) = inner.register_liveness().await {
            error!(id = %inner.id, "failed to restore liveness: {}", e);
        }
    }
}
