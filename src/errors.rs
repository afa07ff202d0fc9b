//! Error hierarchy for the coordination client.
//!
//! Errors are grouped by the layer that raises them. Transient store failures
//! ([`StoreError::ConnectionLoss`], [`StoreError::SessionExpired`]) are retried inside
//! [`crate::StoreClient`] and normally never reach callers; everything else is structural
//! and surfaces immediately.

use std::time::Duration;

use config::ConfigError;
use tokio::task::JoinError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Coordination store failures
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Payload decoding and typed field access failures
    #[error(transparent)]
    Record(#[from] RecordError),

    /// Participant lifecycle and state transition failures
    #[error(transparent)]
    Participant(#[from] ParticipantError),

    /// Cluster administration failures
    #[error(transparent)]
    Admin(#[from] AdminError),

    /// Listener registration failures
    #[error(transparent)]
    Watch(#[from] WatchError),

    /// Engine shutdown failures
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),

    /// Configuration loading and validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Unrecoverable failures
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The node (or its parent, for creates) does not exist
    #[error("Node not found: {0}")]
    NotFound(String),

    /// A create targeted a node that is already present
    #[error("Node already exists: {0}")]
    AlreadyExists(String),

    /// Conditional write lost against a concurrent modification
    #[error("Version conflict on {path} (expected version {expected})")]
    VersionConflict { path: String, expected: i32 },

    /// Delete of a node that still has children
    #[error("Node not empty: {0}")]
    NotEmpty(String),

    /// Connectivity to the store was interrupted
    #[error("Connection to coordination store lost")]
    ConnectionLoss,

    /// The session owning this connection expired
    #[error("Coordination store session expired")]
    SessionExpired,

    /// Read-modify-write gave up after the caller imposed bound
    #[error("Gave up updating {path} after {attempts} conflicting attempts")]
    ConflictRetriesExhausted { path: String, attempts: usize },

    /// Transient retries exhausted under a bounded retry policy
    #[error("Store operation failed after {attempts} attempts")]
    RetryExhausted { attempts: usize },

    /// Path is not absolute or has empty segments
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

impl StoreError {
    /// Connectivity class failures that are retried with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::ConnectionLoss | StoreError::SessionExpired)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    /// The payload is not a structurally valid record document
    #[error("Malformed payload at {path}: {reason}")]
    MalformedPayload { path: String, reason: String },

    /// A record could not be encoded
    #[error("Failed to encode record {id}: {reason}")]
    Encode { id: String, reason: String },

    /// A string field could not be interpreted as the requested type
    #[error("Field {key} has invalid value {value:?}")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParticipantError {
    /// Another session already owns this participant's liveness node
    #[error("Participant {0} is already live")]
    AlreadyLive(String),

    #[error("State model {model} declares transition {from} -> {to} more than once")]
    DuplicateTransition { model: String, from: String, to: String },

    #[error("State model {model} has no transition {from} -> {to}")]
    NoSuchTransition { model: String, from: String, to: String },

    #[error("No state model registered under {0}")]
    UnknownStateModel(String),

    #[error("Participant is already connected")]
    AlreadyConnected,

    #[error("Participant is not connected")]
    NotConnected,

    /// Participant config missing and auto join is not allowed
    #[error("Instance {0} is not configured in the cluster")]
    InstanceNotConfigured(String),

    #[error("Invalid message {id}: {reason}")]
    InvalidMessage { id: String, reason: String },

    /// The transition handler panicked or was cancelled
    #[error("Transition handler for partition {partition} failed: {reason}")]
    TransitionFailed { partition: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdminError {
    #[error("Cluster {0} is not set up")]
    ClusterNotSetup(String),

    #[error("Resource {0} already exists")]
    ResourceExists(String),

    #[error("Resource {0} does not exist")]
    ResourceNotExists(String),

    #[error("State model definition {0} does not exist")]
    StateModelDefNotExist(String),

    #[error("Node {0} does not exist")]
    NodeNotExist(String),

    #[error("Instance {0} does not exist")]
    InstanceNotExist(String),

    #[error("Config scope {0} is not supported")]
    UnsupportedConfigScope(String),

    /// Instance ids take the form `host_port`
    #[error("Invalid instance id {0}")]
    InvalidInstanceId(String),

    #[error("Invalid add resource option: {0}")]
    InvalidAddResourceOption(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WatchError {
    /// Per-instance kinds need an instance id, cluster-wide kinds must not have one
    #[error("Invalid watch key {kind}: {reason}")]
    InvalidKey { kind: String, reason: String },

    #[error("Spectator is already connected")]
    AlreadyConnected,
}

#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    /// Watch loops or the dispatcher did not exit in time
    #[error("Shutdown did not complete within {0:?}")]
    Timeout(Duration),

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Store(StoreError::NotFound(_)))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::Store(StoreError::AlreadyExists(_)))
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Error::Store(StoreError::VersionConflict { .. }))
    }

    pub fn is_not_empty(&self) -> bool {
        matches!(self, Error::Store(StoreError::NotEmpty(_)))
    }
}

// ============== Conversion Implementations ============== //

impl From<JoinError> for Error {
    fn from(err: JoinError) -> Self {
        Error::Shutdown(ShutdownError::TaskFailed(err))
    }
}
