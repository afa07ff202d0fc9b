//! Configuration management for the coordination client.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support (`CONFIG_PATH`)
//! - Environment variable overrides (`HELIX__` prefix, `__` separator)
//! - Component-wise validation
mod participant;
mod retry;
mod watch;
pub use participant::*;
pub use retry::*;
pub use watch::*;


use std::env;
use std::fmt::Debug;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

/// Main configuration container
///
/// Combines all subsystem configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables (highest priority)
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct HelixConfig {
    /// Retry policies for store access
    #[serde(default)]
    pub retry: RetryPolicies,
    /// Change notification engine parameters
    #[serde(default)]
    pub watch: WatchConfig,
    /// Participant executor parameters
    #[serde(default)]
    pub participant: ParticipantConfig,
}

impl Debug for HelixConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("HelixConfig")
            .field("retry", &self.retry)
            .field("watch", &self.watch)
            .finish_non_exhaustive()
    }
}

impl HelixConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// # Note
    /// Validation is deferred so further overrides can be applied with
    /// `with_override_config()`. Call `validate()` once all overrides are in.
    ///
    /// # Example
    /// ```ignore
    /// let cfg = HelixConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("HELIX")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional configuration overrides from file without validation.
    ///
    /// Merging order (later sources override earlier):
    /// 1. Current configuration values
    /// 2. New configuration file
    /// 3. Latest environment variables (highest priority)
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("HELIX")
                    .separator("__")
                    .ignore_empty(true)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates every subsystem and returns the validated instance.
    pub fn validate(self) -> Result<Self> {
        self.retry.validate()?;
        self.watch.validate()?;
        self.participant.validate()?;
        Ok(self)
    }
}
