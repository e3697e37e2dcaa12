//! Replica Runtime - ties the board and the protocol tables to a mailbox.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Replica                            │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │                 Mailbox (seqcast_env)                │   │
//! │  │  • receive() → drain inbound                         │   │
//! │  │  • send(dest, msg) → own outbound channels only      │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │                              │                              │
//! │  ┌───────────┐ ┌───────────┐ ┌──────────────┐ ┌─────────┐   │
//! │  │ Sequencer │ │ Submitter │ │   Ordered    │ │  Board  │   │
//! │  │ (coord.)  │ │           │ │   Receiver   │ │         │   │
//! │  └───────────┘ └───────────┘ └──────────────┘ └─────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use seqcast_core::{Replica, ReplicaConfig};
//! use seqcast_env::{Mailbox, ReplicaId};
//!
//! let config = ReplicaConfig::default().with_replicas(3);
//! let mut replica = Replica::new(Mailbox::new(ReplicaId(1), 3), config);
//!
//! replica.create_entry("hello", now)?;
//! // every tick, after the transports delivered:
//! replica.update(now)?;
//! ```

use crate::board::{Board, Entry};
use crate::error::{ProtocolError, ReplicaError};
use crate::payload::{Payload, RequestId, SeqNo};
use crate::receiver::{OrderedReceiver, Receipt};
use crate::sequencer::{Admission, AckOutcome, Outbound, Sequencer};
use crate::submitter::Submitter;

use seqcast_env::{Mailbox, Message, ReplicaId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Configuration shared by every replica of a cluster.
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    /// Number of replicas, ids `0..num_replicas`
    pub num_replicas: usize,

    /// The single ordering authority (default: replica 0)
    pub coordinator: ReplicaId,

    /// Logical time between retransmissions (default: 1.0)
    pub retry_interval: f64,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            num_replicas: 2,
            coordinator: ReplicaId(0),
            retry_interval: 1.0,
        }
    }
}

impl ReplicaConfig {
    pub fn with_replicas(mut self, num_replicas: usize) -> Self {
        self.num_replicas = num_replicas;
        self
    }

    pub fn with_retry_interval(mut self, retry_interval: f64) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// True if `id` is one of `0..num_replicas`.
    pub fn contains(&self, id: ReplicaId) -> bool {
        id.index() < self.num_replicas
    }

    /// All replica ids in ascending order.
    pub fn replicas(&self) -> Vec<ReplicaId> {
        ReplicaId::range(self.num_replicas).collect()
    }
}

/// Role of a replica in the broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Coordinator,
    Follower,
}

/// Administrative status of a replica.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplicaStatus {
    pub crashed: bool,
    pub notes: String,

    /// Entries applied so far; doubles as the local entry id allocator
    pub num_entries: u64,
}

/// Read-only view of a replica for cross-replica comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaSnapshot {
    pub replica: ReplicaId,
    pub entries: Vec<Entry>,
    pub len: usize,
    pub hash: String,
    pub crashed: bool,
    pub notes: String,
}

impl ReplicaSnapshot {
    /// Values in board order.
    pub fn values(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.value.as_str()).collect()
    }
}

/// Counters collected while handling messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplicaStats {
    pub messages_handled: u64,
    pub applied: u64,
    pub duplicates_absorbed: u64,
    pub buffered: u64,
    pub stale: u64,
    pub protocol_errors: u64,
}

/// One participant holding a copy of the log.
pub struct Replica {
    id: ReplicaId,
    config: ReplicaConfig,
    mailbox: Mailbox,
    board: Board,

    /// Present on the coordinator only
    sequencer: Option<Sequencer>,

    submitter: Submitter,
    receiver: OrderedReceiver,
    status: ReplicaStatus,
    stats: ReplicaStats,
}

impl Replica {
    /// Creates a replica owning `mailbox`; its id is the mailbox owner.
    pub fn new(mailbox: Mailbox, config: ReplicaConfig) -> Self {
        let id = mailbox.own_id();
        let sequencer = (id == config.coordinator)
            .then(|| Sequencer::new(id, config.replicas(), config.retry_interval));
        let submitter = Submitter::new(id, config.retry_interval);

        Self {
            id,
            config,
            mailbox,
            board: Board::new(),
            sequencer,
            submitter,
            receiver: OrderedReceiver::new(),
            status: ReplicaStatus::default(),
            stats: ReplicaStats::default(),
        }
    }

    pub fn id(&self) -> ReplicaId {
        self.id
    }

    pub fn role(&self) -> Role {
        if self.sequencer.is_some() {
            Role::Coordinator
        } else {
            Role::Follower
        }
    }

    pub fn is_coordinator(&self) -> bool {
        self.sequencer.is_some()
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    /// Mailbox access for wiring links.
    pub fn mailbox_mut(&mut self) -> &mut Mailbox {
        &mut self.mailbox
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn sequencer(&self) -> Option<&Sequencer> {
        self.sequencer.as_ref()
    }

    pub fn submitter(&self) -> &Submitter {
        &self.submitter
    }

    pub fn receiver(&self) -> &OrderedReceiver {
        &self.receiver
    }

    pub fn status(&self) -> &ReplicaStatus {
        &self.status
    }

    pub fn stats(&self) -> &ReplicaStats {
        &self.stats
    }

    pub fn is_crashed(&self) -> bool {
        self.status.crashed
    }

    /// Pauses (`true`) or resumes (`false`) the replica.
    ///
    /// A crashed replica keeps its state; the driver just stops updating it.
    pub fn set_crashed(&mut self, crashed: bool) {
        if self.status.crashed != crashed {
            info!(replica = %self.id, crashed, "crash state changed");
        }
        self.status.crashed = crashed;
    }

    pub fn set_notes(&mut self, notes: impl Into<String>) {
        self.status.notes = notes.into();
    }

    /// Board entries ordered by local id.
    pub fn get_entries(&self) -> Vec<Entry> {
        self.board.get_ordered_entries()
    }

    pub fn snapshot(&self) -> ReplicaSnapshot {
        let entries = self.board.get_ordered_entries();
        ReplicaSnapshot {
            replica: self.id,
            len: entries.len(),
            hash: self.board.content_hash(),
            entries,
            crashed: self.status.crashed,
            notes: self.status.notes.clone(),
        }
    }

    /// Submits a value for global ordering.
    ///
    /// Sends `add_entry` to the coordinator and keeps resending it on every
    /// `update` until `ack_add` arrives. The value shows up on this board
    /// only once the coordinator's broadcast comes back.
    pub fn create_entry(&mut self, value: &str, now: f64) -> Result<RequestId, ReplicaError> {
        let (req_id, msg) = self.submitter.create(value, now)?;
        debug!(replica = %self.id, req_id, value, "submitting add_entry");
        self.mailbox.send(self.config.coordinator, msg)?;
        Ok(req_id)
    }

    /// Called once per tick: drain the inbox, then retransmit what is due.
    ///
    /// Protocol violations are logged and skipped. The whole batch is
    /// handled and retransmission still runs when a send fails; the first
    /// routing error is returned afterwards.
    pub fn update(&mut self, now: f64) -> Result<(), ReplicaError> {
        let mut first_error = None;

        for msg in self.mailbox.receive() {
            debug!(replica = %self.id, now, %msg, "received message");
            match self.handle_message(&msg, now) {
                Ok(()) => {}
                Err(ReplicaError::Protocol(e)) => {
                    self.stats.protocol_errors += 1;
                    warn!(replica = %self.id, error = %e, "discarding message");
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Err(e) = self.retransmit(now) {
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Handles one inbound message.
    pub fn handle_message(&mut self, msg: &Message, now: f64) -> Result<(), ReplicaError> {
        let payload = Payload::from_message(msg)?;
        self.stats.messages_handled += 1;

        match payload {
            Payload::AddEntry {
                entry_value,
                req_id,
                from,
            } => self.handle_add_entry(&entry_value, req_id, from, now),
            Payload::AckAdd { req_id, to } => {
                self.handle_ack_add(req_id, to);
                Ok(())
            }
            Payload::Propagate {
                id,
                entry_value,
                from,
            } => self.handle_propagate(id, entry_value, from),
            Payload::Ack { id, from } => self.handle_ack(id, from),
        }
    }

    fn handle_add_entry(
        &mut self,
        value: &str,
        req_id: RequestId,
        requester: ReplicaId,
        now: f64,
    ) -> Result<(), ReplicaError> {
        let Some(sequencer) = self.sequencer.as_mut() else {
            return Err(ProtocolError::NotCoordinator {
                replica: self.id,
                kind: "add_entry",
            }
            .into());
        };

        if !self.config.contains(requester) {
            return Err(ProtocolError::UnknownReplica {
                replica: requester,
                kind: "add_entry",
            }
            .into());
        }

        let (admission, out) = sequencer.accept(value, req_id, requester, now)?;
        if let Admission::Accepted(seq) = admission {
            info!(seq, %requester, req_id, value, "coordinator sequenced value");
        }
        self.send_all(out)
    }

    fn handle_ack_add(&mut self, req_id: RequestId, to: ReplicaId) {
        if to != self.id {
            debug!(replica = %self.id, %to, req_id, "ack_add addressed elsewhere");
            return;
        }
        if self.submitter.acknowledge(req_id) {
            debug!(replica = %self.id, req_id, "creation request acknowledged");
        }
    }

    fn handle_propagate(
        &mut self,
        seq: SeqNo,
        value: String,
        origin: ReplicaId,
    ) -> Result<(), ReplicaError> {
        if origin != self.config.coordinator {
            return Err(ProtocolError::ForeignOrigin { seq, origin }.into());
        }

        // One ack per physical receipt; the coordinator's resend provokes the next
        let ack = Payload::Ack { id: seq, from: self.id }.to_message()?;
        self.mailbox.send(self.config.coordinator, ack)?;

        match self.receiver.receive(origin, seq, value) {
            Receipt::Applied(values) => {
                for (seq, value) in values {
                    self.apply(seq, value);
                }
            }
            Receipt::Buffered => {
                self.stats.buffered += 1;
                debug!(replica = %self.id, seq, expected = self.receiver.expected_seq(origin), "buffered out-of-order propagate");
            }
            Receipt::Duplicate => self.stats.duplicates_absorbed += 1,
            Receipt::Stale => {
                self.stats.stale += 1;
                debug!(replica = %self.id, seq, "ignoring stale propagate");
            }
        }
        Ok(())
    }

    fn handle_ack(&mut self, seq: SeqNo, from: ReplicaId) -> Result<(), ReplicaError> {
        let Some(sequencer) = self.sequencer.as_mut() else {
            return Err(ProtocolError::NotCoordinator {
                replica: self.id,
                kind: "ack",
            }
            .into());
        };

        if sequencer.acknowledge(seq, from) == AckOutcome::Retired {
            debug!(seq, "broadcast fully acknowledged");
        }
        Ok(())
    }

    fn apply(&mut self, seq: SeqNo, value: String) {
        self.status.num_entries += 1;
        let entry = Entry::new(self.status.num_entries, value);
        debug!(replica = %self.id, seq, entry = %entry, "applied");
        self.board.add_entry(entry);
        self.stats.applied += 1;
    }

    fn retransmit(&mut self, now: f64) -> Result<(), ReplicaError> {
        if let Some(sequencer) = self.sequencer.as_mut() {
            let out = sequencer.due_retries(now);
            self.send_all(out)?;
        }

        for msg in self.submitter.due_resends(now) {
            self.mailbox.send(self.config.coordinator, msg)?;
        }
        Ok(())
    }

    fn send_all(&self, out: Vec<Outbound>) -> Result<(), ReplicaError> {
        for Outbound { to, message } in out {
            self.mailbox.send(to, message)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Replica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica")
            .field("id", &self.id)
            .field("role", &self.role())
            .field("entries", &self.board.len())
            .field("status", &self.status)
            .finish()
    }
}
