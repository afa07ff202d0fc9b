use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::TransitionRequest;
use crate::ParticipantError;
use crate::Result;

/// Runs one state transition for one partition. Called on the blocking pool.
pub type TransitionHandler = Arc<dyn Fn(&TransitionRequest) + Send + Sync>;

pub struct Transition {
    from: String,
    to: String,
    handler: TransitionHandler,
}

impl Transition {
    pub fn new<F>(
        from: impl Into<String>,
        to: impl Into<String>,
        handler: F,
    ) -> Self
    where
        F: Fn(&TransitionRequest) + Send + Sync + 'static,
    {
        Self {
            from: from.into(),
            to: to.into(),
            handler: Arc::new(handler),
        }
    }

    pub fn from_state(&self) -> &str {
        &self.from
    }

    pub fn to_state(&self) -> &str {
        &self.to
    }
}

impl fmt::Debug for Transition {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Transition({} -> {})", self.from, self.to)
    }
}

/// A named set of transition handlers keyed by `(from, to)`.
pub struct StateModel {
    name: String,
    transitions: HashMap<(String, String), TransitionHandler>,
}

impl StateModel {
    /// Fails with [`ParticipantError::DuplicateTransition`] when two transitions share
    /// the same `(from, to)` pair.
    pub fn new(
        name: impl Into<String>,
        transitions: Vec<Transition>,
    ) -> Result<Self> {
        let name = name.into();
        let mut table = HashMap::with_capacity(transitions.len());
        for t in transitions {
            let key = (t.from, t.to);
            if table.contains_key(&key) {
                return Err(ParticipantError::DuplicateTransition {
                    model: name,
                    from: key.0,
                    to: key.1,
                }
                .into());
            }
            table.insert(key, t.handler);
        }
        Ok(Self {
            name,
            transitions: table,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transition(
        &self,
        from: &str,
        to: &str,
    ) -> Option<TransitionHandler> {
        self.transitions
            .get(&(from.to_string(), to.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }
}

impl fmt::Debug for StateModel {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let mut pairs: Vec<String> = self
            .transitions
            .keys()
            .map(|(from, to)| format!("{from}->{to}"))
            .collect();
        pairs.sort();
        f.debug_struct("StateModel")
            .field("name", &self.name)
            .field("transitions", &pairs)
            .finish()
    }
}
