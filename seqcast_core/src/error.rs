//! Protocol and replica errors.

use seqcast_env::{EnvError, ReplicaId};
use thiserror::Error;

/// A message that violates the wire protocol.
///
/// These are always handled locally: the offending message is logged and
/// discarded, and replica state is left untouched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Message without type tag: {0}")]
    MissingType(String),

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Malformed {kind} message: {reason}")]
    Malformed { kind: String, reason: String },

    #[error("Replica {replica} is not the coordinator but received {kind}")]
    NotCoordinator { replica: ReplicaId, kind: &'static str },

    #[error("{kind} from {replica}, which is not a member of the cluster")]
    UnknownReplica { replica: ReplicaId, kind: &'static str },

    #[error("Propagate for seq {seq} from {origin}, which is not the coordinator")]
    ForeignOrigin { seq: u64, origin: ReplicaId },
}

/// Errors surfaced from a replica operation.
#[derive(Debug, Error)]
pub enum ReplicaError {
    /// A discarded inbound message
    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// Routing or serialization failure on the send path
    #[error("Environment error: {0}")]
    Env(#[from] EnvError),
}
