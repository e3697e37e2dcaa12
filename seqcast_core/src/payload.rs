//! Wire payloads exchanged between replicas.
//!
//! Every payload travels as the canonical JSON text of a [`Message`], with a
//! `"type"` tag naming the variant:
//!
//! | type        | fields                          | direction                 |
//! |-------------|---------------------------------|---------------------------|
//! | `add_entry` | `entry_value`, `req_id`, `from` | any replica → coordinator |
//! | `ack_add`   | `req_id`, `to`                  | coordinator → requester   |
//! | `propagate` | `id`, `entry_value`, `from`     | coordinator → all         |
//! | `ack`       | `id`, `from`                    | any replica → coordinator |

use crate::error::ProtocolError;
use seqcast_env::{EnvError, Message, ReplicaId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Global sequence number assigned by the coordinator (first is 1).
pub type SeqNo = u64;

/// Creation request id, unique per submitting replica.
pub type RequestId = u64;

const KNOWN_TYPES: [&str; 4] = ["add_entry", "ack_add", "propagate", "ack"];

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// Ask the coordinator to sequence a value
    AddEntry {
        entry_value: String,
        req_id: RequestId,
        from: ReplicaId,
    },

    /// Coordinator has accepted request `req_id` from `to`
    AckAdd { req_id: RequestId, to: ReplicaId },

    /// Sequenced broadcast of one accepted value
    Propagate {
        id: SeqNo,
        entry_value: String,
        from: ReplicaId,
    },

    /// Replica `from` has received sequence number `id`
    Ack { id: SeqNo, from: ReplicaId },
}

impl Payload {
    /// Returns the wire name of this payload's type.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::AddEntry { .. } => "add_entry",
            Payload::AckAdd { .. } => "ack_add",
            Payload::Propagate { .. } => "propagate",
            Payload::Ack { .. } => "ack",
        }
    }

    /// Freezes this payload into a message.
    pub fn to_message(&self) -> Result<Message, EnvError> {
        Message::encode(self)
    }

    /// Parses a message, classifying what is wrong with it when it fails.
    pub fn from_message(msg: &Message) -> Result<Self, ProtocolError> {
        let content: Value = msg.content().map_err(|e| ProtocolError::Malformed {
            kind: "unknown".to_string(),
            reason: e.to_string(),
        })?;

        let kind = match content.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            Some(other) => return Err(ProtocolError::UnknownType(other.to_string())),
            None => return Err(ProtocolError::MissingType(msg.to_string())),
        };

        if !KNOWN_TYPES.contains(&kind.as_str()) {
            return Err(ProtocolError::UnknownType(kind));
        }

        serde_json::from_value(content).map_err(|e| ProtocolError::Malformed {
            kind,
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape_of_propagate() {
        let payload = Payload::Propagate {
            id: 3,
            entry_value: "hello".to_string(),
            from: ReplicaId(0),
        };
        let msg = payload.to_message().unwrap();
        let content = msg.content().unwrap();

        assert_eq!(content["type"], "propagate");
        assert_eq!(content["id"], 3);
        assert_eq!(content["entry_value"], "hello");
        assert_eq!(content["from"], 0);

        assert_eq!(Payload::from_message(&msg).unwrap(), payload);
    }

    #[test]
    fn test_missing_type_tag() {
        let msg = Message::encode(&json!({"entry_value": "x"})).unwrap();
        assert!(matches!(
            Payload::from_message(&msg),
            Err(ProtocolError::MissingType(_))
        ));

        // A bare string has no tag either
        let msg = Message::encode(&"Hello from 0").unwrap();
        assert!(matches!(
            Payload::from_message(&msg),
            Err(ProtocolError::MissingType(_))
        ));
    }

    #[test]
    fn test_unknown_type() {
        let msg = Message::encode(&json!({"type": "delete_entry", "id": 1})).unwrap();
        assert_eq!(
            Payload::from_message(&msg),
            Err(ProtocolError::UnknownType("delete_entry".to_string()))
        );
    }

    #[test]
    fn test_propagate_missing_id_is_malformed() {
        let msg = Message::encode(&json!({"type": "propagate", "entry_value": "x", "from": 0})).unwrap();
        match Payload::from_message(&msg) {
            Err(ProtocolError::Malformed { kind, .. }) => assert_eq!(kind, "propagate"),
            other => panic!("expected malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_unparseable_text_is_malformed() {
        let msg = Message::from_text("{oops");
        assert!(matches!(
            Payload::from_message(&msg),
            Err(ProtocolError::Malformed { .. })
        ));
    }
}
