//! The coordinator's broadcast state machine.
//!
//! For every accepted value:
//!
//! ```text
//!   add_entry ──► accept ──► propagate to all, ack_add to requester
//!                   │
//!                   ▼
//!           outstanding[seq] = { pending: all replicas, last_sent }
//!                   │
//!        ack(seq, r)│ pending -= r            retry tick
//!                   ▼                    (now - last_sent >= interval)
//!           pending empty? ── yes ──► retire     resend to pending
//! ```
//!
//! Retries never give up: a replica that never answers keeps its
//! outstanding records alive forever.

use crate::payload::{Payload, RequestId, SeqNo};
use seqcast_env::{EnvError, Message, ReplicaId};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// A message the caller must put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: ReplicaId,
    pub message: Message,
}

impl Outbound {
    pub fn new(to: ReplicaId, message: Message) -> Self {
        Self { to, message }
    }
}

/// Coordinator-side tracking of one unacknowledged broadcast.
#[derive(Debug, Clone)]
pub struct OutstandingBroadcast {
    /// The frozen propagate message, resent verbatim
    pub message: Message,

    /// Replicas that have not acknowledged yet
    pub pending: BTreeSet<ReplicaId>,

    /// Logical time of the last (re)transmission
    pub last_sent: f64,
}

/// Result of presenting a creation request to the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Newly sequenced under this number
    Accepted(SeqNo),

    /// Seen before; only the acknowledgment is repeated
    Duplicate(SeqNo),
}

impl Admission {
    pub fn seq(&self) -> SeqNo {
        match self {
            Admission::Accepted(seq) | Admission::Duplicate(seq) => *seq,
        }
    }
}

/// Result of an acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// No outstanding record for this sequence number
    Unknown,

    /// Still waiting on this many replicas
    Pending(usize),

    /// Last acknowledgment arrived; record deleted
    Retired,
}

/// Global ordering authority. Lives on the coordinator only.
#[derive(Debug)]
pub struct Sequencer {
    coordinator: ReplicaId,
    replicas: Vec<ReplicaId>,
    retry_interval: f64,

    /// Last sequence number handed out (0 = none yet)
    last_seq: SeqNo,

    outstanding: BTreeMap<SeqNo, OutstandingBroadcast>,

    /// Every accepted (requester, request id), so resent requests are
    /// acknowledged again instead of being sequenced twice
    accepted: HashMap<(ReplicaId, RequestId), SeqNo>,

    retransmissions: u64,
}

impl Sequencer {
    /// Creates a sequencer broadcasting to `replicas` (the coordinator included).
    pub fn new(coordinator: ReplicaId, replicas: Vec<ReplicaId>, retry_interval: f64) -> Self {
        Self {
            coordinator,
            replicas,
            retry_interval,
            last_seq: 0,
            outstanding: BTreeMap::new(),
            accepted: HashMap::new(),
            retransmissions: 0,
        }
    }

    /// Sequences a creation request and returns what must be sent.
    ///
    /// A new request yields a `propagate` to every replica followed by an
    /// `ack_add` to the requester. A request already accepted yields only
    /// the `ack_add`.
    pub fn accept(
        &mut self,
        value: &str,
        req_id: RequestId,
        requester: ReplicaId,
        now: f64,
    ) -> Result<(Admission, Vec<Outbound>), EnvError> {
        let ack_add = Payload::AckAdd {
            req_id,
            to: requester,
        }
        .to_message()?;

        if let Some(&seq) = self.accepted.get(&(requester, req_id)) {
            debug!(%requester, req_id, seq, "repeated add_entry, re-acknowledging");
            return Ok((Admission::Duplicate(seq), vec![Outbound::new(requester, ack_add)]));
        }

        let seq = self.last_seq + 1;
        let propagate = Payload::Propagate {
            id: seq,
            entry_value: value.to_string(),
            from: self.coordinator,
        }
        .to_message()?;

        self.last_seq = seq;
        self.accepted.insert((requester, req_id), seq);

        let mut out: Vec<Outbound> = self
            .replicas
            .iter()
            .map(|&r| Outbound::new(r, propagate.clone()))
            .collect();
        out.push(Outbound::new(requester, ack_add));

        self.outstanding.insert(
            seq,
            OutstandingBroadcast {
                message: propagate,
                pending: self.replicas.iter().copied().collect(),
                last_sent: now,
            },
        );

        Ok((Admission::Accepted(seq), out))
    }

    /// Records that `from` has received `seq`.
    pub fn acknowledge(&mut self, seq: SeqNo, from: ReplicaId) -> AckOutcome {
        let Some(record) = self.outstanding.get_mut(&seq) else {
            return AckOutcome::Unknown;
        };

        record.pending.remove(&from);
        if record.pending.is_empty() {
            self.outstanding.remove(&seq);
            AckOutcome::Retired
        } else {
            AckOutcome::Pending(record.pending.len())
        }
    }

    /// Resends every record idle for at least the retry interval.
    pub fn due_retries(&mut self, now: f64) -> Vec<Outbound> {
        let mut out = Vec::new();

        for (seq, record) in self.outstanding.iter_mut() {
            if now - record.last_sent < self.retry_interval {
                continue;
            }
            debug!(seq, pending = record.pending.len(), "retransmitting propagate");
            for &r in &record.pending {
                out.push(Outbound::new(r, record.message.clone()));
            }
            record.last_sent = now;
        }

        self.retransmissions += out.len() as u64;
        out
    }

    pub fn outstanding(&self, seq: SeqNo) -> Option<&OutstandingBroadcast> {
        self.outstanding.get(&seq)
    }

    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }

    /// Last sequence number handed out.
    pub fn last_seq(&self) -> SeqNo {
        self.last_seq
    }

    /// Total propagate messages resent so far.
    pub fn retransmissions(&self) -> u64 {
        self.retransmissions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequencer(n: usize) -> Sequencer {
        Sequencer::new(ReplicaId(0), ReplicaId::range(n).collect(), 1.0)
    }

    fn decode(out: &Outbound) -> Payload {
        Payload::from_message(&out.message).unwrap()
    }

    #[test]
    fn test_accept_broadcasts_then_acks_requester() {
        let mut seq = sequencer(3);
        let (admission, out) = seq.accept("v", 7, ReplicaId(2), 0.0).unwrap();

        assert_eq!(admission, Admission::Accepted(1));
        assert_eq!(out.len(), 4);
        for (i, o) in out.iter().take(3).enumerate() {
            assert_eq!(o.to, ReplicaId(i));
            assert_eq!(
                decode(o),
                Payload::Propagate { id: 1, entry_value: "v".into(), from: ReplicaId(0) }
            );
        }
        assert_eq!(out[3].to, ReplicaId(2));
        assert_eq!(decode(&out[3]), Payload::AckAdd { req_id: 7, to: ReplicaId(2) });

        let record = seq.outstanding(1).unwrap();
        assert_eq!(record.pending.len(), 3);
    }

    #[test]
    fn test_sequence_numbers_strictly_increase() {
        let mut seq = sequencer(2);
        let a = seq.accept("a", 1, ReplicaId(1), 0.0).unwrap().0.seq();
        let b = seq.accept("b", 1, ReplicaId(0), 0.0).unwrap().0.seq();
        let c = seq.accept("c", 2, ReplicaId(1), 0.0).unwrap().0.seq();
        assert_eq!((a, b, c), (1, 2, 3));
        assert_eq!(seq.last_seq(), 3);
    }

    #[test]
    fn test_repeated_request_is_not_resequenced() {
        let mut seq = sequencer(2);
        seq.accept("a", 1, ReplicaId(1), 0.0).unwrap();
        let (admission, out) = seq.accept("a", 1, ReplicaId(1), 1.5).unwrap();

        assert_eq!(admission, Admission::Duplicate(1));
        assert_eq!(out.len(), 1);
        assert_eq!(decode(&out[0]), Payload::AckAdd { req_id: 1, to: ReplicaId(1) });
        assert_eq!(seq.last_seq(), 1);
        assert_eq!(seq.outstanding_count(), 1);
    }

    #[test]
    fn test_record_retired_after_all_acks() {
        let mut seq = sequencer(2);
        seq.accept("a", 1, ReplicaId(1), 0.0).unwrap();

        assert_eq!(seq.acknowledge(1, ReplicaId(1)), AckOutcome::Pending(1));
        // Duplicate ack changes nothing
        assert_eq!(seq.acknowledge(1, ReplicaId(1)), AckOutcome::Pending(1));
        assert_eq!(seq.acknowledge(1, ReplicaId(0)), AckOutcome::Retired);
        assert!(seq.outstanding(1).is_none());
        assert_eq!(seq.acknowledge(1, ReplicaId(0)), AckOutcome::Unknown);

        // Nothing left to retry
        assert!(seq.due_retries(10.0).is_empty());
    }

    #[test]
    fn test_retry_only_pending_and_only_when_due() {
        let mut seq = sequencer(3);
        seq.accept("a", 1, ReplicaId(1), 0.0).unwrap();
        seq.acknowledge(1, ReplicaId(0));

        assert!(seq.due_retries(0.99).is_empty());

        let out = seq.due_retries(1.0);
        let targets: Vec<_> = out.iter().map(|o| o.to).collect();
        assert_eq!(targets, vec![ReplicaId(1), ReplicaId(2)]);

        // last_sent was reset
        assert!(seq.due_retries(1.5).is_empty());
        assert_eq!(seq.due_retries(2.0).len(), 2);
        assert_eq!(seq.retransmissions(), 4);
    }
}
