//! Error types for the SeqCast environment abstraction.

use crate::types::ReplicaId;
use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Destination is not a configured outbound link of the sender
    #[error("Invalid destination {destination} for replica {sender}")]
    InvalidDestination {
        sender: ReplicaId,
        destination: ReplicaId,
    },

    /// The far end of a link has been dropped
    #[error("Link closed: {0}")]
    LinkClosed(String),

    /// Payload serialization/deserialization failed
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Invalid link or context configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl EnvError {
    /// Creates a link-closed error.
    pub fn link_closed(msg: impl Into<String>) -> Self {
        Self::LinkClosed(msg.into())
    }

    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}
