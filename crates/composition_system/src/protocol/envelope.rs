//! Wire form of the interactive protocol
//!
//! Every frame is a JSON envelope `{"op": <string>, "d": <payload>}`.
//! Outbound frames mirror [`Packet`](super::Packet) one to one, inbound frames
//! carry the front end's answers.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Untyped envelope as it travels over a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub op: String,
    #[serde(default)]
    pub d: Value,
}

/// Frames sent to the front end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "d", rename_all = "snake_case")]
pub enum Outbound {
    Prompt {
        id: u64,
        text: String,
        default: Option<String>,
    },
    Message {
        text: String,
        error: bool,
    },
    Close {},
}

impl Outbound {
    pub fn encode(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Frames received from the front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// `value: null` takes the prompt's default
    Answer { id: u64, value: Option<String> },
    Reject { id: u64, reason: String },
}

#[derive(Deserialize)]
struct AnswerPayload {
    id: u64,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Deserialize)]
struct RejectPayload {
    id: u64,
    reason: String,
}

impl Inbound {
    /// Parses an inbound frame. Ops other than `answer` and `reject` are
    /// reported as [`ProtocolError::UnsupportedOp`].
    pub fn decode(frame: &str) -> ProtocolResult<Self> {
        let envelope: Envelope = serde_json::from_str(frame)?;
        match envelope.op.as_str() {
            "answer" => {
                let payload: AnswerPayload = serde_json::from_value(envelope.d)?;
                Ok(Inbound::Answer {
                    id: payload.id,
                    value: payload.value,
                })
            }
            "reject" => {
                let payload: RejectPayload = serde_json::from_value(envelope.d)?;
                Ok(Inbound::Reject {
                    id: payload.id,
                    reason: payload.reason,
                })
            }
            _ => Err(ProtocolError::UnsupportedOp(envelope.op)),
        }
    }

    pub fn id(&self) -> u64 {
        match self {
            Inbound::Answer { id, .. } | Inbound::Reject { id, .. } => *id,
        }
    }

    pub fn encode(&self) -> ProtocolResult<String> {
        let envelope = match self {
            Inbound::Answer { id, value } => Envelope {
                op: "answer".to_string(),
                d: serde_json::json!({ "id": id, "value": value }),
            },
            Inbound::Reject { id, reason } => Envelope {
                op: "reject".to_string(),
                d: serde_json::json!({ "id": id, "reason": reason }),
            },
        };
        Ok(serde_json::to_string(&envelope)?)
    }
}
