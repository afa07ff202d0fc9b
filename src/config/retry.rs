use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Basic retry policy template
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Maximum number of attempts (0 means unlimited retries)
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Backoff base (unit: milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff time (unit: milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl BackoffPolicy {
    fn validate(
        &self,
        name: &str,
    ) -> Result<()> {
        if self.base_delay_ms == 0 {
            return Err(Error::Config(ConfigError::Message(format!(
                "{name}.base_delay_ms must be greater than 0"
            ))));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(Error::Config(ConfigError::Message(format!(
                "{name}.max_delay_ms ({}) must be >= base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            ))));
        }
        Ok(())
    }
}

/// Bound on read-modify-write attempts that lose against concurrent writers
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConflictPolicy {
    /// `None` keeps re-reading until the write lands
    #[serde(default)]
    pub max_attempts: Option<usize>,
}

/// Divide strategies by failure class
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RetryPolicies {
    /// Transient connectivity failures (connection loss, session expiry)
    #[serde(default)]
    pub store: BackoffPolicy,

    /// Version conflicts inside read-modify-write helpers
    #[serde(default)]
    pub conflict: ConflictPolicy,
}

impl RetryPolicies {
    pub fn validate(&self) -> Result<()> {
        self.store.validate("retry.store")?;
        if self.conflict.max_attempts == Some(0) {
            return Err(Error::Config(ConfigError::Message(
                "retry.conflict.max_attempts must be greater than 0 when set".into(),
            )));
        }
        Ok(())
    }
}

fn default_max_retries() -> usize {
    0
}
fn default_base_delay_ms() -> u64 {
    10
}
fn default_max_delay_ms() -> u64 {
    1000
}
