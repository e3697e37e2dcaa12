//! Ground truth oracle for simulation.
//!
//! The Oracle knows every value that was submitted and judges replica
//! snapshots against it:
//! - Prefix agreement (no two replicas disagree at any position)
//! - Convergence (live replicas identical, every submission present once)
//! - Hash agreement (equal boards hash equally)

use seqcast_core::ReplicaSnapshot;
use seqcast_env::ReplicaId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// One `submit` call as seen by the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub replica: ReplicaId,
    pub value: String,
    pub time: f64,
}

/// A replication property that does not hold.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("{replica} holds {found:?} at position {position}, {reference} holds {expected:?}")]
    Divergent {
        replica: ReplicaId,
        reference: ReplicaId,
        position: usize,
        found: String,
        expected: String,
    },

    #[error("{replica} has {len} entries, expected {expected}")]
    Incomplete {
        replica: ReplicaId,
        len: usize,
        expected: usize,
    },

    #[error("{replica} hash {found} differs from {reference} hash {expected}")]
    HashMismatch {
        replica: ReplicaId,
        reference: ReplicaId,
        found: String,
        expected: String,
    },

    #[error("value {value:?} applied {applied} times but submitted {submitted} times")]
    Cardinality {
        value: String,
        submitted: usize,
        applied: usize,
    },

    #[error("no live replica to check")]
    NoLiveReplica,
}

/// Records submissions and checks the replication properties.
#[derive(Debug, Clone, Default)]
pub struct Oracle {
    submissions: Vec<Submission>,
}

impl Oracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remembers a submitted value.
    pub fn record(&mut self, replica: ReplicaId, value: &str, time: f64) {
        self.submissions.push(Submission {
            replica,
            value: value.to_string(),
            time,
        });
    }

    /// Number of submissions, which is the expected final board length.
    pub fn expected_len(&self) -> usize {
        self.submissions.len()
    }

    fn submitted_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for s in &self.submissions {
            *counts.entry(s.value.as_str()).or_insert(0) += 1;
        }
        counts
    }

    /// Every board is a prefix of the longest board.
    ///
    /// Holds at every instant, crashed replicas included.
    pub fn check_prefix_agreement(&self, snapshots: &[ReplicaSnapshot]) -> Result<(), Violation> {
        let Some(longest) = snapshots.iter().max_by_key(|s| s.len) else {
            return Ok(());
        };

        for snapshot in snapshots {
            for (position, (entry, reference)) in
                snapshot.entries.iter().zip(&longest.entries).enumerate()
            {
                if entry.value != reference.value {
                    return Err(Violation::Divergent {
                        replica: snapshot.replica,
                        reference: longest.replica,
                        position,
                        found: entry.value.clone(),
                        expected: reference.value.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Live replicas hold identical boards containing each submission
    /// exactly once.
    pub fn check_convergence(&self, snapshots: &[ReplicaSnapshot]) -> Result<(), Violation> {
        self.check_prefix_agreement(snapshots)?;

        let live: Vec<&ReplicaSnapshot> = snapshots.iter().filter(|s| !s.crashed).collect();
        let reference = live.first().ok_or(Violation::NoLiveReplica)?;

        let expected = self.expected_len();
        for snapshot in &live {
            if snapshot.len != expected {
                return Err(Violation::Incomplete {
                    replica: snapshot.replica,
                    len: snapshot.len,
                    expected,
                });
            }
            if snapshot.hash != reference.hash {
                return Err(Violation::HashMismatch {
                    replica: snapshot.replica,
                    reference: reference.replica,
                    found: snapshot.hash.clone(),
                    expected: reference.hash.clone(),
                });
            }
        }

        let mut applied: BTreeMap<&str, usize> = BTreeMap::new();
        for entry in &reference.entries {
            *applied.entry(entry.value.as_str()).or_insert(0) += 1;
        }
        let submitted = self.submitted_counts();

        for (value, &count) in submitted.iter() {
            let got = applied.get(value).copied().unwrap_or(0);
            if got != count {
                return Err(Violation::Cardinality {
                    value: value.to_string(),
                    submitted: count,
                    applied: got,
                });
            }
        }
        for (value, &got) in applied.iter() {
            if !submitted.contains_key(value) {
                return Err(Violation::Cardinality {
                    value: value.to_string(),
                    submitted: 0,
                    applied: got,
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seqcast_core::Entry;

    fn snapshot(replica: usize, values: &[&str], hash: &str) -> ReplicaSnapshot {
        let entries: Vec<Entry> = values
            .iter()
            .enumerate()
            .map(|(i, v)| Entry::new(i as u64 + 1, *v))
            .collect();
        ReplicaSnapshot {
            replica: ReplicaId(replica),
            len: entries.len(),
            entries,
            hash: hash.to_string(),
            crashed: false,
            notes: String::new(),
        }
    }

    fn oracle(values: &[&str]) -> Oracle {
        let mut oracle = Oracle::new();
        for v in values {
            oracle.record(ReplicaId(0), v, 0.0);
        }
        oracle
    }

    #[test]
    fn test_prefix_agreement() {
        let oracle = Oracle::new();
        let snaps = vec![snapshot(0, &["a", "b", "c"], "h3"), snapshot(1, &["a", "b"], "h2")];
        assert!(oracle.check_prefix_agreement(&snaps).is_ok());

        let snaps = vec![snapshot(0, &["a", "b", "c"], "h3"), snapshot(1, &["a", "x"], "hx")];
        assert!(matches!(
            oracle.check_prefix_agreement(&snaps),
            Err(Violation::Divergent { position: 1, .. })
        ));
    }

    #[test]
    fn test_convergence_ok() {
        let oracle = oracle(&["a", "b"]);
        let snaps = vec![snapshot(0, &["b", "a"], "h"), snapshot(1, &["b", "a"], "h")];
        assert_eq!(oracle.check_convergence(&snaps), Ok(()));
    }

    #[test]
    fn test_convergence_incomplete() {
        let oracle = oracle(&["a", "b"]);
        let snaps = vec![snapshot(0, &["a", "b"], "h"), snapshot(1, &["a"], "h1")];
        assert!(matches!(
            oracle.check_convergence(&snaps),
            Err(Violation::Incomplete { len: 1, expected: 2, .. })
        ));
    }

    #[test]
    fn test_crashed_replica_excluded() {
        let oracle = oracle(&["a"]);
        let mut lagging = snapshot(1, &[], "h0");
        lagging.crashed = true;
        let snaps = vec![snapshot(0, &["a"], "h"), lagging];
        assert!(oracle.check_convergence(&snaps).is_ok());
    }

    #[test]
    fn test_duplicate_application_detected() {
        let oracle = oracle(&["a", "b"]);
        let snaps = vec![snapshot(0, &["a", "a"], "h")];
        assert!(matches!(
            oracle.check_convergence(&snaps),
            Err(Violation::Cardinality { applied: 2, submitted: 1, .. })
        ));
    }

    #[test]
    fn test_hash_mismatch() {
        let oracle = oracle(&["a"]);
        let snaps = vec![snapshot(0, &["a"], "h"), snapshot(1, &["a"], "other")];
        assert!(matches!(
            oracle.check_convergence(&snaps),
            Err(Violation::HashMismatch { .. })
        ));
    }
}
