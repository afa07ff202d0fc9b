use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::Record;
use crate::Result;
use crate::WatchError;

/// What a watch loop observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChangeKind {
    ExternalView,
    LiveInstances,
    IdealState,
    InstanceConfig,
    ControllerMessages,
    /// Scoped to one instance
    CurrentState,
    /// Scoped to one instance
    Messages,
}

impl ChangeKind {
    pub fn is_per_instance(&self) -> bool {
        matches!(self, ChangeKind::CurrentState | ChangeKind::Messages)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::ExternalView => "external_view",
            ChangeKind::LiveInstances => "live_instances",
            ChangeKind::IdealState => "ideal_state",
            ChangeKind::InstanceConfig => "instance_config",
            ChangeKind::ControllerMessages => "controller_messages",
            ChangeKind::CurrentState => "current_state",
            ChangeKind::Messages => "messages",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one watch loop: a kind plus, for per-instance kinds, the instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchKey {
    pub kind: ChangeKind,
    pub instance: Option<String>,
}

impl WatchKey {
    pub fn new(
        kind: ChangeKind,
        instance: Option<&str>,
    ) -> Result<Self> {
        match (kind.is_per_instance(), instance) {
            (true, None) => Err(WatchError::InvalidKey {
                kind: kind.to_string(),
                reason: "an instance id is required".into(),
            }
            .into()),
            (false, Some(_)) => Err(WatchError::InvalidKey {
                kind: kind.to_string(),
                reason: "cluster-wide kinds take no instance id".into(),
            }
            .into()),
            (_, Some("")) => Err(WatchError::InvalidKey {
                kind: kind.to_string(),
                reason: "instance id is empty".into(),
            }
            .into()),
            _ => Ok(Self {
                kind,
                instance: instance.map(str::to_string),
            }),
        }
    }
}

impl fmt::Display for WatchKey {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match &self.instance {
            Some(i) => write!(f, "{}({})", self.kind, i),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// A typed change event carrying the freshly re-read records of one subtree.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    ExternalViewChanged(Vec<Record>),
    LiveInstancesChanged(Vec<Record>),
    IdealStateChanged(Vec<Record>),
    InstanceConfigChanged(Vec<Record>),
    ControllerMessagesChanged(Vec<Record>),
    CurrentStateChanged { instance: String, records: Vec<Record> },
    MessagesChanged { instance: String, records: Vec<Record> },
}

impl Notification {
    pub(crate) fn new(
        key: &WatchKey,
        records: Vec<Record>,
    ) -> Self {
        let instance = key.instance.clone().unwrap_or_default();
        match key.kind {
            ChangeKind::ExternalView => Notification::ExternalViewChanged(records),
            ChangeKind::LiveInstances => Notification::LiveInstancesChanged(records),
            ChangeKind::IdealState => Notification::IdealStateChanged(records),
            ChangeKind::InstanceConfig => Notification::InstanceConfigChanged(records),
            ChangeKind::ControllerMessages => Notification::ControllerMessagesChanged(records),
            ChangeKind::CurrentState => Notification::CurrentStateChanged { instance, records },
            ChangeKind::Messages => Notification::MessagesChanged { instance, records },
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            Notification::ExternalViewChanged(_) => ChangeKind::ExternalView,
            Notification::LiveInstancesChanged(_) => ChangeKind::LiveInstances,
            Notification::IdealStateChanged(_) => ChangeKind::IdealState,
            Notification::InstanceConfigChanged(_) => ChangeKind::InstanceConfig,
            Notification::ControllerMessagesChanged(_) => ChangeKind::ControllerMessages,
            Notification::CurrentStateChanged { .. } => ChangeKind::CurrentState,
            Notification::MessagesChanged { .. } => ChangeKind::Messages,
        }
    }

    pub fn instance(&self) -> Option<&str> {
        match self {
            Notification::CurrentStateChanged { instance, .. }
            | Notification::MessagesChanged { instance, .. } => Some(instance),
            _ => None,
        }
    }

    pub fn key(&self) -> WatchKey {
        WatchKey {
            kind: self.kind(),
            instance: self.instance().map(str::to_string),
        }
    }

    pub fn records(&self) -> &[Record] {
        match self {
            Notification::ExternalViewChanged(r)
            | Notification::LiveInstancesChanged(r)
            | Notification::IdealStateChanged(r)
            | Notification::InstanceConfigChanged(r)
            | Notification::ControllerMessagesChanged(r) => r,
            Notification::CurrentStateChanged { records, .. }
            | Notification::MessagesChanged { records, .. } => records,
        }
    }
}

/// Opaque value handed back to a listener with every notification.
#[derive(Clone, Default)]
pub struct Context(Option<Arc<dyn Any + Send + Sync>>);

impl Context {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Some(Arc::new(value)))
    }

    pub fn empty() -> Self {
        Self(None)
    }

    pub fn get<T: Any>(&self) -> Option<&T> {
        self.0.as_deref().and_then(|v| v.downcast_ref::<T>())
    }
}

impl fmt::Debug for Context {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self.0 {
            Some(_) => f.write_str("Context(..)"),
            None => f.write_str("Context(empty)"),
        }
    }
}

/// Callback invoked on the dispatch task. Blocking here delays every later notification.
pub type Listener = Arc<dyn Fn(&Notification, &Context) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// Returned by registration, required for removal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
    pub(crate) key: WatchKey,
    pub(crate) id: ListenerId,
}

impl ListenerHandle {
    pub fn key(&self) -> &WatchKey {
        &self.key
    }
}
