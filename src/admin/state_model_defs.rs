//! State model definitions installed into every new cluster.

use crate::Record;
use crate::STATE_MODEL_LEADER_STANDBY;
use crate::STATE_MODEL_MASTER_SLAVE;
use crate::STATE_MODEL_ONLINE_OFFLINE;

const INITIAL_STATE: &str = "INITIAL_STATE";
const STATE_PRIORITY_LIST: &str = "STATE_PRIORITY_LIST";
const STATE_TRANSITION_PRIORITYLIST: &str = "STATE_TRANSITION_PRIORITYLIST";

/// Declarative shape of one definition record.
struct Definition {
    name: &'static str,
    initial: &'static str,
    /// States by priority with their replica count constraint
    states: &'static [(&'static str, &'static str)],
    /// Legal transitions by priority
    transitions: &'static [(&'static str, &'static str)],
    /// `(from, to, next hop)` entries of the routing table
    next: &'static [(&'static str, &'static str, &'static str)],
}

const ONLINE_OFFLINE: Definition = Definition {
    name: STATE_MODEL_ONLINE_OFFLINE,
    initial: "OFFLINE",
    states: &[("ONLINE", "R"), ("OFFLINE", "-1"), ("DROPPED", "-1")],
    transitions: &[
        ("OFFLINE", "ONLINE"),
        ("ONLINE", "OFFLINE"),
        ("OFFLINE", "DROPPED"),
    ],
    next: &[
        ("OFFLINE", "ONLINE", "ONLINE"),
        ("OFFLINE", "DROPPED", "DROPPED"),
        ("ONLINE", "OFFLINE", "OFFLINE"),
        ("ONLINE", "DROPPED", "OFFLINE"),
    ],
};

const MASTER_SLAVE: Definition = Definition {
    name: STATE_MODEL_MASTER_SLAVE,
    initial: "OFFLINE",
    states: &[
        ("MASTER", "1"),
        ("SLAVE", "R"),
        ("OFFLINE", "-1"),
        ("DROPPED", "-1"),
    ],
    transitions: &[
        ("MASTER", "SLAVE"),
        ("SLAVE", "MASTER"),
        ("OFFLINE", "SLAVE"),
        ("SLAVE", "OFFLINE"),
        ("OFFLINE", "DROPPED"),
    ],
    next: &[
        ("MASTER", "SLAVE", "SLAVE"),
        ("MASTER", "OFFLINE", "SLAVE"),
        ("MASTER", "DROPPED", "SLAVE"),
        ("SLAVE", "MASTER", "MASTER"),
        ("SLAVE", "OFFLINE", "OFFLINE"),
        ("SLAVE", "DROPPED", "OFFLINE"),
        ("OFFLINE", "SLAVE", "SLAVE"),
        ("OFFLINE", "MASTER", "SLAVE"),
        ("OFFLINE", "DROPPED", "DROPPED"),
    ],
};

const LEADER_STANDBY: Definition = Definition {
    name: STATE_MODEL_LEADER_STANDBY,
    initial: "OFFLINE",
    states: &[
        ("LEADER", "1"),
        ("STANDBY", "R"),
        ("OFFLINE", "-1"),
        ("DROPPED", "-1"),
    ],
    transitions: &[
        ("LEADER", "STANDBY"),
        ("STANDBY", "LEADER"),
        ("OFFLINE", "STANDBY"),
        ("STANDBY", "OFFLINE"),
        ("OFFLINE", "DROPPED"),
    ],
    next: &[
        ("LEADER", "STANDBY", "STANDBY"),
        ("LEADER", "OFFLINE", "STANDBY"),
        ("LEADER", "DROPPED", "STANDBY"),
        ("STANDBY", "LEADER", "LEADER"),
        ("STANDBY", "OFFLINE", "OFFLINE"),
        ("STANDBY", "DROPPED", "OFFLINE"),
        ("OFFLINE", "STANDBY", "STANDBY"),
        ("OFFLINE", "LEADER", "STANDBY"),
        ("OFFLINE", "DROPPED", "DROPPED"),
    ],
};

impl Definition {
    fn to_record(&self) -> Record {
        let mut r = Record::new(self.name);
        r.set_simple_field(INITIAL_STATE, self.initial);
        r.set_list_field(
            STATE_PRIORITY_LIST,
            self.states.iter().map(|(s, _)| s.to_string()).collect(),
        );
        r.set_list_field(
            STATE_TRANSITION_PRIORITYLIST,
            self.transitions
                .iter()
                .map(|(from, to)| format!("{from}-{to}"))
                .collect(),
        );
        for (state, count) in self.states {
            r.set_map_field(format!("{state}.meta"), "count", *count);
        }
        for (from, to, hop) in self.next {
            r.set_map_field(format!("{from}.next"), *to, *hop);
        }
        r
    }
}

/// Records written under `STATEMODELDEFS` by [`super::ClusterAdmin::add_cluster`].
pub(crate) fn default_state_model_defs() -> Vec<Record> {
    [ONLINE_OFFLINE, MASTER_SLAVE, LEADER_STANDBY]
        .iter()
        .map(Definition::to_record)
        .collect()
}
