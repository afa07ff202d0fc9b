//! Role factory sharing one store connection.

use std::sync::Arc;

use crate::ClusterAdmin;
use crate::HelixConfig;
use crate::Participant;
use crate::Spectator;
use crate::StoreClient;

/// Creates spectators, participants and admins over a shared [`StoreClient`].
///
/// # Example
/// ```ignore
/// let store = MemoryStore::new();
/// let client = Arc::new(StoreClient::new(Arc::new(store.connect()), RetryPolicies::default()));
/// let manager = HelixManager::new(client);
///
/// let spectator = manager.spectator("cluster");
/// spectator.add_live_instance_listener(|records, _| println!("{} live", records.len()), Context::empty())?;
/// spectator.connect().await?;
/// ```
#[derive(Debug, Clone)]
pub struct HelixManager {
    client: Arc<StoreClient>,
    config: HelixConfig,
}

impl HelixManager {
    pub fn new(client: Arc<StoreClient>) -> Self {
        Self {
            client,
            config: HelixConfig::default(),
        }
    }

    /// Uses the watch and participant sections of `config` for the roles it creates.
    pub fn with_config(
        mut self,
        config: HelixConfig,
    ) -> Self {
        self.config = config;
        self
    }

    pub fn client(&self) -> &Arc<StoreClient> {
        &self.client
    }

    pub fn spectator(
        &self,
        cluster: &str,
    ) -> Spectator {
        Spectator::new(cluster, self.client.clone(), self.config.watch.clone())
    }

    /// A participant identified as `host_port`.
    pub fn participant(
        &self,
        cluster: &str,
        host: &str,
        port: u16,
    ) -> Participant {
        Participant::new(
            cluster,
            host,
            port,
            self.client.clone(),
            self.config.participant.clone(),
        )
    }

    pub fn admin(&self) -> ClusterAdmin {
        ClusterAdmin::new(self.client.clone())
    }
}
