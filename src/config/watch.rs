use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WatchConfig {
    /// Capacity of the ordered notification queue shared by all watch loops
    ///
    /// Watch loops block once the queue is full; notifications are never dropped.
    ///
    /// **Default**: 1000
    #[serde(default = "default_notification_queue_size")]
    pub notification_queue_size: usize,

    /// How long `stop()` waits for loops to exit and the queue to drain
    ///
    /// **Default**: 5000 ms
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            notification_queue_size: default_notification_queue_size(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl WatchConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.notification_queue_size == 0 {
            return Err(Error::Config(ConfigError::Message(
                "watch.notification_queue_size must be greater than 0".into(),
            )));
        }
        if self.shutdown_timeout_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "watch.shutdown_timeout_ms must be greater than 0".into(),
            )));
        }
        Ok(())
    }
}

fn default_notification_queue_size() -> usize {
    1000
}
fn default_shutdown_timeout_ms() -> u64 {
    5000
}
