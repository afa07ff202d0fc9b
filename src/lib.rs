//! Cluster participant and spectator client over a hierarchical, versioned,
//! watch-capable coordination store.
//!
//! The crate is organised leaf-first:
//! - [`Record`] - the JSON document model stored in every node payload
//! - [`StoreClient`] - retry and version protected access to a [`CoordinationStore`]
//! - [`Spectator`] - watch loops that turn one-shot store watches into an ordered stream of
//!   [`Notification`]s delivered to registered listeners
//! - [`Participant`] - liveness registration plus the message driven state transition executor
//!
//! [`ClusterAdmin`] and [`HelixManager`] sit on top of these as thin convenience layers.

mod admin;
mod config;
mod constants;
mod errors;
mod keys;
mod manager;
mod metrics;
mod participant;
mod record;
mod store;
mod utils;
mod watch;

#[cfg(test)]
mod keys_test;

pub use admin::*;
pub use config::*;
pub use constants::*;
pub use errors::*;
pub use keys::*;
pub use manager::*;
pub use metrics::*;
pub use participant::*;
pub use record::*;
pub use store::*;
pub use watch::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub(crate) mod test_utils;
