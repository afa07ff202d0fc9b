// -
// Path segments

pub(crate) const CONFIGS: &str = "CONFIGS";
pub(crate) const IDEALSTATES: &str = "IDEALSTATES";
pub(crate) const EXTERNALVIEW: &str = "EXTERNALVIEW";
pub(crate) const LIVEINSTANCES: &str = "LIVEINSTANCES";
pub(crate) const INSTANCES: &str = "INSTANCES";
pub(crate) const STATEMODELDEFS: &str = "STATEMODELDEFS";
pub(crate) const CONTROLLER: &str = "CONTROLLER";
pub(crate) const PROPERTYSTORE: &str = "PROPERTYSTORE";

// -
// Record field names

/// Participant config fields
pub const HELIX_HOST: &str = "HELIX_HOST";
pub const HELIX_PORT: &str = "HELIX_PORT";
pub const HELIX_ENABLED: &str = "HELIX_ENABLED";

/// Cluster config fields
pub const ALLOW_PARTICIPANT_AUTO_JOIN: &str = "allowParticipantAutoJoin";

/// Ideal state fields
pub const NUM_PARTITIONS: &str = "NUM_PARTITIONS";
pub const REPLICAS: &str = "REPLICAS";
pub const REBALANCE_MODE: &str = "REBALANCE_MODE";
pub const REBALANCE_STRATEGY: &str = "REBALANCE_STRATEGY";
pub const BUCKET_SIZE: &str = "BUCKET_SIZE";
pub const MAX_PARTITIONS_PER_INSTANCE: &str = "MAX_PARTITIONS_PER_INSTANCE";
pub const STATE_MODEL_DEF_REF: &str = "STATE_MODEL_DEF_REF";

/// Live instance fields
pub const HELIX_VERSION: &str = "HELIX_VERSION";
pub const SESSION_ID: &str = "SESSION_ID";
pub const LIVE_INSTANCE: &str = "LIVE_INSTANCE";

/// Message fields
pub const MSG_TYPE: &str = "MSG_TYPE";
pub const MSG_ID: &str = "MSG_ID";
pub const PARTITION_NAME: &str = "PARTITION_NAME";
pub const RESOURCE_NAME: &str = "RESOURCE_NAME";
pub const STATE_MODEL_DEF: &str = "STATE_MODEL_DEF";
pub const FROM_STATE: &str = "FROM_STATE";
pub const TO_STATE: &str = "TO_STATE";
pub const TGT_NAME: &str = "TGT_NAME";

/// Current state and error report fields
pub const CURRENT_STATE: &str = "CURRENT_STATE";
pub const ERROR: &str = "ERROR";

// -
// Well-known values

pub const STATE_TRANSITION_MSG: &str = "STATE_TRANSITION";

pub const STATE_MODEL_ONLINE_OFFLINE: &str = "OnlineOffline";
pub const STATE_MODEL_MASTER_SLAVE: &str = "MasterSlave";
pub const STATE_MODEL_LEADER_STANDBY: &str = "LeaderStandby";

/// Version string advertised in live instance records
pub(crate) const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Passes `delete_tree` makes over a node that keeps gaining children
pub(crate) const MAX_TREE_DELETE_PASSES: usize = 16;
