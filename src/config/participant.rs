use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ParticipantConfig {
    /// State assumed for a partition the participant has not seen before
    #[serde(default = "default_initial_state")]
    pub initial_state: String,

    /// Pending messages buffered per partition before routing blocks
    #[serde(default = "default_partition_queue_size")]
    pub partition_queue_size: usize,

    /// Honor the cluster's `allowParticipantAutoJoin` when the instance is not configured
    #[serde(default = "default_auto_join")]
    pub auto_join: bool,
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self {
            initial_state: default_initial_state(),
            partition_queue_size: default_partition_queue_size(),
            auto_join: default_auto_join(),
        }
    }
}

impl ParticipantConfig {
    pub fn validate(&self) -> Result<()> {
        if self.initial_state.trim().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "participant.initial_state cannot be empty".into(),
            )));
        }
        if self.partition_queue_size == 0 {
            return Err(Error::Config(ConfigError::Message(
                "participant.partition_queue_size must be greater than 0".into(),
            )));
        }
        Ok(())
    }
}

fn default_initial_state() -> String {
    "OFFLINE".into()
}
fn default_partition_queue_size() -> usize {
    100
}
fn default_auto_join() -> bool {
    true
}
