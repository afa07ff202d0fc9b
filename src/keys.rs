//! Path namespace of a cluster.
//!
//! Every path is a pure function of the cluster name and the entity ids passed in.

use crate::constants::CONFIGS;
use crate::constants::CONTROLLER;
use crate::constants::EXTERNALVIEW;
use crate::constants::IDEALSTATES;
use crate::constants::INSTANCES;
use crate::constants::LIVEINSTANCES;
use crate::constants::PROPERTYSTORE;
use crate::constants::STATEMODELDEFS;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyBuilder {
    cluster: String,
}

impl KeyBuilder {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
        }
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster
    }

    pub fn cluster(&self) -> String {
        format!("/{}", self.cluster)
    }

    pub fn property_store(&self) -> String {
        format!("/{}/{PROPERTYSTORE}", self.cluster)
    }

    // -
    // CONFIGS

    pub fn configs(&self) -> String {
        format!("/{}/{CONFIGS}", self.cluster)
    }

    pub fn cluster_configs(&self) -> String {
        format!("/{}/{CONFIGS}/CLUSTER", self.cluster)
    }

    /// The cluster config record, named after the cluster itself
    pub fn cluster_config(&self) -> String {
        format!("/{0}/{CONFIGS}/CLUSTER/{0}", self.cluster)
    }

    pub fn participant_configs(&self) -> String {
        format!("/{}/{CONFIGS}/PARTICIPANT", self.cluster)
    }

    pub fn participant_config(
        &self,
        instance: &str,
    ) -> String {
        format!("/{}/{CONFIGS}/PARTICIPANT/{instance}", self.cluster)
    }

    pub fn resource_configs(&self) -> String {
        format!("/{}/{CONFIGS}/RESOURCE", self.cluster)
    }

    pub fn resource_config(
        &self,
        resource: &str,
    ) -> String {
        format!("/{}/{CONFIGS}/RESOURCE/{resource}", self.cluster)
    }

    // -
    // Resource views

    pub fn idealstates(&self) -> String {
        format!("/{}/{IDEALSTATES}", self.cluster)
    }

    pub fn idealstate(
        &self,
        resource: &str,
    ) -> String {
        format!("/{}/{IDEALSTATES}/{resource}", self.cluster)
    }

    pub fn external_view(&self) -> String {
        format!("/{}/{EXTERNALVIEW}", self.cluster)
    }

    pub fn external_view_for_resource(
        &self,
        resource: &str,
    ) -> String {
        format!("/{}/{EXTERNALVIEW}/{resource}", self.cluster)
    }

    pub fn state_model_defs(&self) -> String {
        format!("/{}/{STATEMODELDEFS}", self.cluster)
    }

    pub fn state_model_def(
        &self,
        name: &str,
    ) -> String {
        format!("/{}/{STATEMODELDEFS}/{name}", self.cluster)
    }

    // -
    // Instances

    pub fn live_instances(&self) -> String {
        format!("/{}/{LIVEINSTANCES}", self.cluster)
    }

    pub fn live_instance(
        &self,
        instance: &str,
    ) -> String {
        format!("/{}/{LIVEINSTANCES}/{instance}", self.cluster)
    }

    pub fn instances(&self) -> String {
        format!("/{}/{INSTANCES}", self.cluster)
    }

    pub fn instance(
        &self,
        instance: &str,
    ) -> String {
        format!("/{}/{INSTANCES}/{instance}", self.cluster)
    }

    pub fn messages(
        &self,
        instance: &str,
    ) -> String {
        format!("{}/MESSAGES", self.instance(instance))
    }

    pub fn message(
        &self,
        instance: &str,
        msg_id: &str,
    ) -> String {
        format!("{}/MESSAGES/{msg_id}", self.instance(instance))
    }

    pub fn current_states(
        &self,
        instance: &str,
    ) -> String {
        format!("{}/CURRENTSTATES", self.instance(instance))
    }

    pub fn current_states_for_session(
        &self,
        instance: &str,
        session: &str,
    ) -> String {
        format!("{}/CURRENTSTATES/{session}", self.instance(instance))
    }

    pub fn current_state_for_resource(
        &self,
        instance: &str,
        session: &str,
        resource: &str,
    ) -> String {
        format!("{}/CURRENTSTATES/{session}/{resource}", self.instance(instance))
    }

    pub fn errors(
        &self,
        instance: &str,
    ) -> String {
        format!("{}/ERRORS", self.instance(instance))
    }

    pub fn errors_for_resource(
        &self,
        instance: &str,
        session: &str,
        resource: &str,
    ) -> String {
        format!("{}/ERRORS/{session}/{resource}", self.instance(instance))
    }

    pub fn status_updates(
        &self,
        instance: &str,
    ) -> String {
        format!("{}/STATUSUPDATES", self.instance(instance))
    }

    // -
    // CONTROLLER

    pub fn controller(&self) -> String {
        format!("/{}/{CONTROLLER}", self.cluster)
    }

    pub fn controller_messages(&self) -> String {
        format!("/{}/{CONTROLLER}/MESSAGES", self.cluster)
    }

    pub fn controller_message(
        &self,
        msg_id: &str,
    ) -> String {
        format!("/{}/{CONTROLLER}/MESSAGES/{msg_id}", self.cluster)
    }

    pub fn controller_errors(&self) -> String {
        format!("/{}/{CONTROLLER}/ERRORS", self.cluster)
    }

    pub fn controller_history(&self) -> String {
        format!("/{}/{CONTROLLER}/HISTORY", self.cluster)
    }

    pub fn controller_status_updates(&self) -> String {
        format!("/{}/{CONTROLLER}/STATUSUPDATES", self.cluster)
    }

    /// Paths that must all exist for the cluster to count as set up
    pub fn cluster_skeleton(&self) -> Vec<String> {
        vec![
            self.cluster(),
            self.idealstates(),
            self.participant_configs(),
            self.property_store(),
            self.live_instances(),
            self.instances(),
            self.external_view(),
            self.state_model_defs(),
            self.controller(),
            self.controller_errors(),
            self.controller_history(),
            self.controller_messages(),
            self.controller_status_updates(),
        ]
    }

    /// Sub-nodes created under `INSTANCES/<id>` for every instance
    pub fn instance_skeleton(
        &self,
        instance: &str,
    ) -> Vec<String> {
        vec![
            self.instance(instance),
            self.messages(instance),
            self.current_states(instance),
            self.errors(instance),
            self.status_updates(instance),
        ]
    }
}
