//! SeqCast Core - Coordinator-Sequenced Reliable Broadcast
//!
//! One coordinator assigns a global order to submitted values and broadcasts
//! them; every replica reassembles a strictly ordered, duplicate-free stream
//! from a lossy, reordering channel:
//! 1. **Submission**: `add_entry` resent until the coordinator's `ack_add`
//! 2. **Sequencing**: `propagate` resent to each replica until it `ack`s
//! 3. **Delivery**: reorder buffer + applied set, so every replica applies
//!    sequence numbers exactly once and in order

pub mod board;
pub mod error;
pub mod payload;
pub mod receiver;
pub mod replica;
pub mod sequencer;
pub mod submitter;

// Re-export key types for convenience
pub use board::{Board, Entry};
pub use error::{ProtocolError, ReplicaError};
pub use payload::{Payload, RequestId, SeqNo};
pub use receiver::{OrderedReceiver, Receipt};
pub use replica::{Replica, ReplicaConfig, ReplicaSnapshot, ReplicaStats, ReplicaStatus, Role};
pub use sequencer::{AckOutcome, Admission, OutstandingBroadcast, Outbound, Sequencer};
pub use submitter::{PendingRequest, Submitter};
