//! Submitter side of creation requests: at-least-once delivery to the coordinator.

use crate::payload::{Payload, RequestId};
use seqcast_env::{EnvError, Message, ReplicaId};
use std::collections::BTreeMap;
use tracing::debug;

/// A creation request not yet acknowledged by the coordinator.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub message: Message,
    pub last_sent: f64,
}

/// Tracks this replica's outstanding `add_entry` requests.
///
/// Acknowledgment only stops the resends; the value reaches the local board
/// through the coordinator's broadcast like every other value.
#[derive(Debug)]
pub struct Submitter {
    own_id: ReplicaId,
    retry_interval: f64,
    next_req_id: RequestId,
    pending: BTreeMap<RequestId, PendingRequest>,
    resends: u64,
}

impl Submitter {
    pub fn new(own_id: ReplicaId, retry_interval: f64) -> Self {
        Self {
            own_id,
            retry_interval,
            next_req_id: 1,
            pending: BTreeMap::new(),
            resends: 0,
        }
    }

    /// Allocates a request id and records the request.
    ///
    /// Returns the id and the `add_entry` message to send to the coordinator.
    pub fn create(&mut self, value: &str, now: f64) -> Result<(RequestId, Message), EnvError> {
        let req_id = self.next_req_id;
        let message = Payload::AddEntry {
            entry_value: value.to_string(),
            req_id,
            from: self.own_id,
        }
        .to_message()?;

        self.next_req_id += 1;
        self.pending.insert(
            req_id,
            PendingRequest {
                message: message.clone(),
                last_sent: now,
            },
        );

        Ok((req_id, message))
    }

    /// Drops the pending record for `req_id`. Returns false if there was none.
    pub fn acknowledge(&mut self, req_id: RequestId) -> bool {
        self.pending.remove(&req_id).is_some()
    }

    /// Messages to resend at `now`, resetting their timers.
    pub fn due_resends(&mut self, now: f64) -> Vec<Message> {
        let mut out = Vec::new();
        for (req_id, record) in self.pending.iter_mut() {
            if now - record.last_sent >= self.retry_interval {
                debug!(replica = %self.own_id, req_id, "resending add_entry");
                out.push(record.message.clone());
                record.last_sent = now;
            }
        }
        self.resends += out.len() as u64;
        out
    }

    pub fn is_pending(&self, req_id: RequestId) -> bool {
        self.pending.contains_key(&req_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn resends(&self) -> u64 {
        self.resends
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_are_unique() {
        let mut sub = Submitter::new(ReplicaId(1), 1.0);
        let (a, _) = sub.create("a", 0.0).unwrap();
        let (b, _) = sub.create("b", 0.0).unwrap();
        assert_ne!(a, b);
        assert_eq!(sub.pending_count(), 2);
    }

    #[test]
    fn test_add_entry_shape() {
        let mut sub = Submitter::new(ReplicaId(1), 1.0);
        let (req_id, msg) = sub.create("hello", 0.0).unwrap();
        assert_eq!(
            Payload::from_message(&msg).unwrap(),
            Payload::AddEntry { entry_value: "hello".into(), req_id, from: ReplicaId(1) }
        );
    }

    #[test]
    fn test_resend_until_acknowledged() {
        let mut sub = Submitter::new(ReplicaId(1), 1.0);
        let (req_id, original) = sub.create("a", 0.0).unwrap();

        assert!(sub.due_resends(0.5).is_empty());
        assert_eq!(sub.due_resends(1.0), vec![original.clone()]);
        assert!(sub.due_resends(1.9).is_empty());
        assert_eq!(sub.due_resends(2.0), vec![original]);

        assert!(sub.acknowledge(req_id));
        assert!(!sub.is_pending(req_id));
        assert!(sub.due_resends(10.0).is_empty());

        // Late duplicate ack_add is harmless
        assert!(!sub.acknowledge(req_id));
        assert_eq!(sub.resends(), 2);
    }
}
