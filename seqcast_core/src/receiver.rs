//! Receive side: reassemble a gap-free, duplicate-free stream per origin.

use crate::payload::SeqNo;
use seqcast_env::ReplicaId;
use std::collections::{BTreeMap, HashSet};

/// What happened to one received `(seq, value)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Receipt {
    /// These values became applicable, in sequence order
    Applied(Vec<(SeqNo, String)>),

    /// Ahead of the next expected number; held back
    Buffered,

    /// Already applied
    Duplicate,

    /// Below the next expected number but not in the applied set
    Stale,
}

/// Ordering state for a single origin.
#[derive(Debug, Clone)]
pub struct OriginStream {
    /// Next sequence number that may be applied
    expected_seq: SeqNo,

    /// Values received ahead of `expected_seq`; every key > `expected_seq`
    reorder: BTreeMap<SeqNo, String>,

    applied: HashSet<SeqNo>,
}

impl Default for OriginStream {
    fn default() -> Self {
        Self {
            expected_seq: 1,
            reorder: BTreeMap::new(),
            applied: HashSet::new(),
        }
    }
}

impl OriginStream {
    pub fn expected_seq(&self) -> SeqNo {
        self.expected_seq
    }

    pub fn buffered(&self) -> usize {
        self.reorder.len()
    }

    fn receive(&mut self, seq: SeqNo, value: String) -> Receipt {
        if self.applied.contains(&seq) {
            return Receipt::Duplicate;
        }

        if seq > self.expected_seq {
            self.reorder.insert(seq, value);
            return Receipt::Buffered;
        }
        if seq < self.expected_seq {
            return Receipt::Stale;
        }

        let mut ready = vec![(seq, value)];
        self.mark_applied(seq);

        while let Some(next) = self.reorder.remove(&self.expected_seq) {
            let seq = self.expected_seq;
            ready.push((seq, next));
            self.mark_applied(seq);
        }

        Receipt::Applied(ready)
    }

    fn mark_applied(&mut self, seq: SeqNo) {
        self.applied.insert(seq);
        self.expected_seq = seq + 1;
    }
}

/// Per-origin reorder buffers and applied sets for one replica.
#[derive(Debug, Default)]
pub struct OrderedReceiver {
    streams: BTreeMap<ReplicaId, OriginStream>,
}

impl OrderedReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one received value and reports what became applicable.
    pub fn receive(&mut self, origin: ReplicaId, seq: SeqNo, value: String) -> Receipt {
        self.streams.entry(origin).or_default().receive(seq, value)
    }

    pub fn stream(&self, origin: ReplicaId) -> Option<&OriginStream> {
        self.streams.get(&origin)
    }

    /// Next expected sequence number from `origin` (1 if nothing seen).
    pub fn expected_seq(&self, origin: ReplicaId) -> SeqNo {
        self.streams.get(&origin).map_or(1, |s| s.expected_seq)
    }

    /// Total values held back across origins.
    pub fn buffered(&self) -> usize {
        self.streams.values().map(|s| s.buffered()).sum()
    }
}
