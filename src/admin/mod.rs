//! Cluster administration.
//!
//! Each operation is a short sequence of [`StoreClient`] creates, deletes and field
//! updates; nothing here watches or loops beyond the client's own retries.

mod state_model_defs;


use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::debug;
use tracing::info;

use self::state_model_defs::default_state_model_defs;
use crate::AdminError;
use crate::ConfigValue;
use crate::KeyBuilder;
use crate::Record;
use crate::Result;
use crate::StoreClient;
use crate::StoreError;
use crate::ALLOW_PARTICIPANT_AUTO_JOIN;
use crate::BUCKET_SIZE;
use crate::HELIX_ENABLED;
use crate::HELIX_HOST;
use crate::HELIX_PORT;
use crate::MAX_PARTITIONS_PER_INSTANCE;
use crate::NUM_PARTITIONS;
use crate::REBALANCE_MODE;
use crate::REBALANCE_STRATEGY;
use crate::REPLICAS;
use crate::STATE_MODEL_DEF_REF;

/// Identity and address of a participant, stored under `CONFIGS/PARTICIPANT/<host_port>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceConfig {
    pub host: String,
    pub port: u16,
    pub enabled: bool,
}

impl InstanceConfig {
    pub fn new(
        host: &str,
        port: u16,
    ) -> Self {
        Self {
            host: host.to_string(),
            port,
            enabled: true,
        }
    }

    /// `host_port`
    pub fn id(&self) -> String {
        format!("{}_{}", self.host, self.port)
    }

    pub fn to_record(&self) -> Record {
        let mut r = Record::new(self.id());
        r.set_simple_field(HELIX_HOST, self.host.as_str());
        r.set_simple_field(HELIX_PORT, self.port.to_string());
        r.set_bool_field(HELIX_ENABLED, self.enabled);
        r
    }
}

impl FromStr for InstanceConfig {
    type Err = AdminError;

    /// Parses a `host_port` instance id. The host may itself contain `_`.
    fn from_str(id: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || AdminError::InvalidInstanceId(id.to_string());
        let (host, port) = id.rsplit_once('_').ok_or_else(invalid)?;
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok(Self::new(host, port))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddResourceOption {
    pub partitions: usize,
    pub state_model: String,
    pub rebalancer_mode: String,
    pub rebalance_strategy: Option<String>,
    pub bucket_size: usize,
    pub max_partitions_per_instance: usize,
}

impl AddResourceOption {
    /// `SEMI_AUTO` rebalancing, no strategy, no bucketing, no per-instance cap.
    pub fn new(
        partitions: usize,
        state_model: &str,
    ) -> Self {
        Self {
            partitions,
            state_model: state_model.to_string(),
            rebalancer_mode: "SEMI_AUTO".into(),
            rebalance_strategy: None,
            bucket_size: 0,
            max_partitions_per_instance: 0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| -> Result<()> {
            Err(AdminError::InvalidAddResourceOption(reason.to_string()).into())
        };
        if self.partitions < 1 {
            return invalid("at least one partition is required");
        }
        if self.state_model.is_empty() {
            return invalid("state model is empty");
        }
        if self.rebalancer_mode.is_empty() {
            return invalid("rebalancer mode is empty");
        }
        Ok(())
    }

    fn to_record(
        &self,
        resource: &str,
    ) -> Record {
        let mut r = Record::new(resource);
        r.set_int_field(NUM_PARTITIONS, self.partitions as i64);
        r.set_int_field(REPLICAS, 0);
        r.set_simple_field(REBALANCE_MODE, self.rebalancer_mode.to_ascii_uppercase());
        r.set_simple_field(STATE_MODEL_DEF_REF, self.state_model.as_str());
        if let Some(strategy) = &self.rebalance_strategy {
            r.set_simple_field(REBALANCE_STRATEGY, strategy.as_str());
        }
        if self.bucket_size > 0 {
            r.set_int_field(BUCKET_SIZE, self.bucket_size as i64);
        }
        if self.max_partitions_per_instance > 0 {
            r.set_int_field(MAX_PARTITIONS_PER_INSTANCE, self.max_partitions_per_instance as i64);
        }
        r
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigScope {
    Cluster,
    Constraint,
    Participant,
    Partition,
    Resource,
}

impl fmt::Display for ConfigScope {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            ConfigScope::Cluster => "CLUSTER",
            ConfigScope::Constraint => "CONSTRAINT",
            ConfigScope::Participant => "PARTICIPANT",
            ConfigScope::Partition => "PARTITION",
            ConfigScope::Resource => "RESOURCE",
        };
        f.write_str(s)
    }
}

impl FromStr for ConfigScope {
    type Err = AdminError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CLUSTER" => Ok(ConfigScope::Cluster),
            "CONSTRAINT" => Ok(ConfigScope::Constraint),
            "PARTICIPANT" => Ok(ConfigScope::Participant),
            "PARTITION" => Ok(ConfigScope::Partition),
            "RESOURCE" => Ok(ConfigScope::Resource),
            _ => Err(AdminError::UnsupportedConfigScope(s.to_string())),
        }
    }
}

/// Resources and instances of one cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterInfo {
    pub cluster: String,
    pub resources: Vec<String>,
    pub instances: Vec<String>,
}

impl fmt::Display for ClusterInfo {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        writeln!(f, "Existing resources in cluster {}:", self.cluster)?;
        for r in &self.resources {
            writeln!(f, "  {r}")?;
        }
        writeln!(f)?;
        writeln!(f, "Instances in cluster {}:", self.cluster)?;
        for i in &self.instances {
            writeln!(f, "  {i}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ClusterAdmin {
    client: Arc<StoreClient>,
}

impl ClusterAdmin {
    pub fn new(client: Arc<StoreClient>) -> Self {
        Self { client }
    }

    async fn ensure_cluster_setup(
        &self,
        cluster: &str,
    ) -> Result<KeyBuilder> {
        if !self.client.is_cluster_setup(cluster).await? {
            return Err(AdminError::ClusterNotSetup(cluster.to_string()).into());
        }
        Ok(KeyBuilder::new(cluster))
    }

    /// Creates the cluster namespace with the default state model definitions.
    pub async fn add_cluster(
        &self,
        cluster: &str,
    ) -> Result<()> {
        let keys = KeyBuilder::new(cluster);
        if self.client.exists(&keys.cluster()).await? {
            return Err(StoreError::AlreadyExists(keys.cluster()).into());
        }

        for path in [
            keys.cluster(),
            keys.property_store(),
            keys.instances(),
            keys.idealstates(),
            keys.external_view(),
            keys.live_instances(),
            keys.state_model_defs(),
        ] {
            self.client.create_empty(&path).await?;
        }
        for def in default_state_model_defs() {
            self.client
                .create_record(&keys.state_model_def(&def.id), &def)
                .await?;
        }

        for path in [
            keys.configs(),
            keys.participant_configs(),
            keys.resource_configs(),
            keys.cluster_configs(),
        ] {
            self.client.create_empty(&path).await?;
        }
        self.client
            .create_record(&keys.cluster_config(), &Record::new(cluster))
            .await?;

        for path in [
            keys.controller(),
            keys.controller_errors(),
            keys.controller_history(),
            keys.controller_messages(),
            keys.controller_status_updates(),
        ] {
            self.client.create_empty(&path).await?;
        }
        info!(cluster = %cluster, "cluster added");
        Ok(())
    }

    pub async fn drop_cluster(
        &self,
        cluster: &str,
    ) -> Result<()> {
        self.client.delete_tree(&KeyBuilder::new(cluster).cluster()).await?;
        info!(cluster = %cluster, "cluster dropped");
        Ok(())
    }

    pub async fn add_instance(
        &self,
        cluster: &str,
        instance: &InstanceConfig,
    ) -> Result<()> {
        let keys = self.ensure_cluster_setup(cluster).await?;
        let id = instance.id();
        let config_path = keys.participant_config(&id);
        if self.client.exists(&config_path).await? {
            return Err(StoreError::AlreadyExists(config_path).into());
        }

        self.client
            .create_record(&config_path, &instance.to_record())
            .await?;
        for path in keys.instance_skeleton(&id) {
            self.client.ensure_path(&path).await?;
        }
        info!(cluster = %cluster, instance = %id, "instance added");
        Ok(())
    }

    /// [`ClusterAdmin::add_instance`] from a `host_port` id.
    pub async fn add_node(
        &self,
        cluster: &str,
        node: &str,
    ) -> Result<()> {
        let instance: InstanceConfig = node.parse()?;
        self.add_instance(cluster, &instance).await
    }

    /// Removes the participant config and the instance subtree.
    pub async fn drop_instance(
        &self,
        cluster: &str,
        instance: &str,
    ) -> Result<()> {
        let keys = KeyBuilder::new(cluster);
        let config_path = keys.participant_config(instance);
        if !self.client.exists(&config_path).await? {
            return Err(AdminError::NodeNotExist(instance.to_string()).into());
        }
        let instance_path = keys.instance(instance);
        if !self.client.exists(&instance_path).await? {
            return Err(AdminError::InstanceNotExist(instance.to_string()).into());
        }

        self.client.delete_tree(&config_path).await?;
        self.client.delete_tree(&instance_path).await?;
        info!(cluster = %cluster, instance = %instance, "instance dropped");
        Ok(())
    }

    pub async fn drop_node(
        &self,
        cluster: &str,
        node: &str,
    ) -> Result<()> {
        self.drop_instance(cluster, node).await
    }

    pub async fn add_resource(
        &self,
        cluster: &str,
        resource: &str,
        option: &AddResourceOption,
    ) -> Result<()> {
        option.validate()?;
        let keys = self.ensure_cluster_setup(cluster).await?;

        if !self
            .client
            .exists(&keys.state_model_def(&option.state_model))
            .await?
        {
            return Err(AdminError::StateModelDefNotExist(option.state_model.clone()).into());
        }
        let path = keys.idealstate(resource);
        if self.client.exists(&path).await? {
            return Err(AdminError::ResourceExists(resource.to_string()).into());
        }

        self.client
            .create_record(&path, &option.to_record(resource))
            .await?;
        info!(cluster = %cluster, resource = %resource, "resource added");
        Ok(())
    }

    /// Removes the ideal state and resource config; absent parts are skipped.
    pub async fn drop_resource(
        &self,
        cluster: &str,
        resource: &str,
    ) -> Result<()> {
        let keys = self.ensure_cluster_setup(cluster).await?;
        for path in [keys.idealstate(resource), keys.resource_config(resource)] {
            match self.client.delete_tree(&path).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => debug!(path = %path, "already absent"),
                Err(e) => return Err(e),
            }
        }
        info!(cluster = %cluster, resource = %resource, "resource dropped");
        Ok(())
    }

    pub async fn enable_resource(
        &self,
        cluster: &str,
        resource: &str,
    ) -> Result<()> {
        self.set_resource_enabled(cluster, resource, true).await
    }

    pub async fn disable_resource(
        &self,
        cluster: &str,
        resource: &str,
    ) -> Result<()> {
        self.set_resource_enabled(cluster, resource, false).await
    }

    async fn set_resource_enabled(
        &self,
        cluster: &str,
        resource: &str,
        enabled: bool,
    ) -> Result<()> {
        let keys = self.ensure_cluster_setup(cluster).await?;
        let path = keys.idealstate(resource);
        if !self.client.exists(&path).await? {
            return Err(AdminError::ResourceNotExists(resource.to_string()).into());
        }
        self.client
            .update_record(&path, |r| r.set_bool_field(HELIX_ENABLED, enabled))
            .await?;
        Ok(())
    }

    pub async fn allow_participant_auto_join(
        &self,
        cluster: &str,
        allow: bool,
    ) -> Result<()> {
        let properties = BTreeMap::from([(
            ALLOW_PARTICIPANT_AUTO_JOIN.to_string(),
            allow.to_string(),
        )]);
        self.set_config(cluster, ConfigScope::Cluster, &properties)
            .await
    }

    /// Writes `properties` as simple fields of the scope's config record.
    ///
    /// Only [`ConfigScope::Cluster`] is supported.
    pub async fn set_config(
        &self,
        cluster: &str,
        scope: ConfigScope,
        properties: &BTreeMap<String, String>,
    ) -> Result<()> {
        let path = self.config_path(cluster, scope)?;
        self.client
            .upsert_record(&path, cluster, |r| {
                for (k, v) in properties {
                    r.set_simple_field(k.as_str(), v.as_str());
                }
            })
            .await?;
        debug!(cluster = %cluster, %scope, ?properties, "config updated");
        Ok(())
    }

    /// Reads `keys` from the scope's config record; absent keys are left out.
    pub async fn get_config(
        &self,
        cluster: &str,
        scope: ConfigScope,
        keys: &[&str],
    ) -> Result<BTreeMap<String, ConfigValue>> {
        let path = self.config_path(cluster, scope)?;
        let record = self.client.get_record(&path).await?;
        Ok(keys
            .iter()
            .filter_map(|k| {
                record
                    .get_simple_field(k)
                    .map(|v| (k.to_string(), ConfigValue::from_raw(v)))
            })
            .collect())
    }

    fn config_path(
        &self,
        cluster: &str,
        scope: ConfigScope,
    ) -> Result<String> {
        match scope {
            ConfigScope::Cluster => Ok(KeyBuilder::new(cluster).cluster_config()),
            other => Err(AdminError::UnsupportedConfigScope(other.to_string()).into()),
        }
    }

    /// Root level nodes that hold a complete cluster skeleton.
    pub async fn list_clusters(&self) -> Result<Vec<String>> {
        let mut clusters = Vec::new();
        for child in self.client.children("/").await? {
            if self.client.is_cluster_setup(&child).await? {
                clusters.push(child);
            }
        }
        Ok(clusters)
    }

    pub async fn list_resources(
        &self,
        cluster: &str,
    ) -> Result<Vec<String>> {
        let keys = self.ensure_cluster_setup(cluster).await?;
        self.client.children(&keys.idealstates()).await
    }

    pub async fn list_instances(
        &self,
        cluster: &str,
    ) -> Result<Vec<String>> {
        let keys = self.ensure_cluster_setup(cluster).await?;
        self.client.children(&keys.instances()).await
    }

    pub async fn list_cluster_info(
        &self,
        cluster: &str,
    ) -> Result<ClusterInfo> {
        Ok(ClusterInfo {
            cluster: cluster.to_string(),
            resources: self.list_resources(cluster).await?,
            instances: self.list_instances(cluster).await?,
        })
    }

    /// The participant config record of `instance`.
    pub async fn list_instance_info(
        &self,
        cluster: &str,
        instance: &str,
    ) -> Result<Record> {
        let keys = self.ensure_cluster_setup(cluster).await?;
        let path = keys.participant_config(instance);
        match self.client.get_record(&path).await {
            Err(e) if e.is_not_found() => Err(AdminError::NodeNotExist(instance.to_string()).into()),
            other => other,
        }
    }

    /// Instance ids without the cluster setup check.
    pub async fn get_instances(
        &self,
        cluster: &str,
    ) -> Result<Vec<String>> {
        self.client.children(&KeyBuilder::new(cluster).instances()).await
    }
}
