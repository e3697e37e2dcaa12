//! Common types for the SeqCast environment abstraction.

use crate::error::EnvError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Identifier of a replica in the simulated cluster.
///
/// Replicas are numbered densely from zero; replica 0 is the coordinator
/// in the default configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicaId(pub usize);

impl ReplicaId {
    /// Returns the zero-based index of this replica.
    pub fn index(&self) -> usize {
        self.0
    }

    /// Returns the ids `0..count` in ascending order.
    pub fn range(count: usize) -> impl Iterator<Item = ReplicaId> {
        (0..count).map(ReplicaId)
    }
}

impl From<usize> for ReplicaId {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

impl std::fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Immutable envelope for payloads exchanged between replicas.
///
/// The payload is serialized to its canonical JSON text when the message is
/// built, so nothing the sender does to its own value afterwards can change
/// a message that is already sitting in a channel. Cloning is cheap: the
/// text is shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    content: Arc<str>,
}

impl Message {
    /// Serializes `payload` into a new message.
    pub fn encode<T: Serialize>(payload: &T) -> Result<Self, EnvError> {
        let text = serde_json::to_string(payload)
            .map_err(|e| EnvError::SerializationError(e.to_string()))?;
        Ok(Self { content: text.into() })
    }

    /// Wraps already-serialized text without validating it.
    ///
    /// Used by fault injection and tests to put malformed payloads on a link.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            content: text.into().into(),
        }
    }

    /// Decodes the payload into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, EnvError> {
        serde_json::from_str(&self.content).map_err(|e| EnvError::SerializationError(e.to_string()))
    }

    /// Decodes the payload into an untyped JSON value.
    pub fn content(&self) -> Result<serde_json::Value, EnvError> {
        self.decode()
    }

    /// Returns the canonical text.
    pub fn as_str(&self) -> &str {
        &self.content
    }

    /// Returns the size of the canonical text in bytes.
    pub fn len(&self) -> usize {
        self.content.len()
    }

    /// Returns true if the canonical text is empty.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_is_a_snapshot_of_the_payload() {
        let mut fields = json!({"type": "propagate", "entry_value": "a"});
        let msg = Message::encode(&fields).unwrap();

        fields["entry_value"] = json!("b");

        let content = msg.content().unwrap();
        assert_eq!(content["entry_value"], "a");
    }

    #[test]
    fn test_message_decode_rejects_garbage() {
        let msg = Message::from_text("not json");
        assert!(msg.content().is_err());
        assert_eq!(msg.len(), 8);
    }

    #[test]
    fn test_replica_id_display_and_range() {
        let ids: Vec<_> = ReplicaId::range(3).collect();
        assert_eq!(ids, vec![ReplicaId(0), ReplicaId(1), ReplicaId(2)]);
        assert_eq!(ReplicaId(2).to_string(), "r2");
        assert_eq!(serde_json::to_string(&ReplicaId(7)).unwrap(), "7");
    }
}
