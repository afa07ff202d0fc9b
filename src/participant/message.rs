use crate::ParticipantError;
use crate::Record;
use crate::Result;
use crate::FROM_STATE;
use crate::MSG_TYPE;
use crate::PARTITION_NAME;
use crate::RESOURCE_NAME;
use crate::STATE_MODEL_DEF;
use crate::STATE_TRANSITION_MSG;
use crate::TGT_NAME;
use crate::TO_STATE;

/// A message addressed to a participant, parsed from the record under its `MESSAGES` node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Record id, also the message node name
    pub id: String,
    pub kind: MessageKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    StateTransition(TransitionRequest),
    /// Any other `MSG_TYPE`; acknowledged without action
    Other(String),
}

/// What a `STATE_TRANSITION` message asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRequest {
    pub msg_id: String,
    pub partition: String,
    pub resource: String,
    /// Name of the state model to resolve the transition in
    pub state_model: String,
    /// Sender's view of the current state; the participant's own tracking wins
    pub from_state: Option<String>,
    pub to_state: String,
    pub target: Option<String>,
}

impl Message {
    pub fn from_record(record: &Record) -> Result<Self> {
        let msg_type = record.get_simple_field(MSG_TYPE).unwrap_or_default();
        if !msg_type.eq_ignore_ascii_case(STATE_TRANSITION_MSG) {
            return Ok(Self {
                id: record.id.clone(),
                kind: MessageKind::Other(msg_type.to_string()),
            });
        }

        let required = |key: &str| -> Result<String> {
            match record.get_simple_field(key) {
                Some(v) if !v.is_empty() => Ok(v.to_string()),
                _ => Err(ParticipantError::InvalidMessage {
                    id: record.id.clone(),
                    reason: format!("missing {key}"),
                }
                .into()),
            }
        };
        let optional = |key: &str| {
            record
                .get_simple_field(key)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let resource = required(RESOURCE_NAME)?;
        let request = TransitionRequest {
            msg_id: record.id.clone(),
            partition: required(PARTITION_NAME)?,
            to_state: required(TO_STATE)?,
            state_model: optional(STATE_MODEL_DEF).unwrap_or_else(|| resource.clone()),
            from_state: optional(FROM_STATE),
            target: optional(TGT_NAME),
            resource,
        };
        Ok(Self {
            id: record.id.clone(),
            kind: MessageKind::StateTransition(request),
        })
    }

    pub fn is_state_transition(&self) -> bool {
        matches!(self.kind, MessageKind::StateTransition(_))
    }
}
