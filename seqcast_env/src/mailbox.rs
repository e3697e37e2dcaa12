//! Per-replica mailbox: one inbound channel, one outbound channel per destination.

use crate::error::EnvError;
use crate::types::{Message, ReplicaId};
use std::collections::BTreeMap;
use tokio::sync::mpsc;

/// Sending half of a message channel.
pub type MessageSender = mpsc::UnboundedSender<Message>;

/// Receiving half of a message channel.
pub type MessageReceiver = mpsc::UnboundedReceiver<Message>;

/// Drains every message currently queued on `rx` without waiting.
pub fn drain_all(rx: &mut MessageReceiver) -> Vec<Message> {
    let mut msgs = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        msgs.push(msg);
    }
    msgs
}

/// The only way in and out of a replica.
///
/// A replica writes exclusively to its own outbound channels and reads
/// exclusively from its own inbound channel. Links (transports) own the
/// other ends: they pull from an outbound channel and push into the
/// destination's inbound channel.
///
/// ```text
///  Replica A                Link (A→B)               Replica B
///  send(B, m) ──► out[B] ──► deliver(now) ──► inbound ──► receive()
/// ```
pub struct Mailbox {
    own_id: ReplicaId,
    inbound_tx: MessageSender,
    inbound_rx: MessageReceiver,
    outbound: BTreeMap<ReplicaId, MessageSender>,

    /// Outbound receivers not yet handed to a link
    unwired: BTreeMap<ReplicaId, MessageReceiver>,
}

impl Mailbox {
    /// Creates a mailbox with outbound channels to replicas `0..num_out`
    /// (including itself).
    pub fn new(own_id: ReplicaId, num_out: usize) -> Self {
        Self::with_destinations(own_id, ReplicaId::range(num_out))
    }

    /// Creates a mailbox with outbound channels to the given destinations.
    pub fn with_destinations(
        own_id: ReplicaId,
        destinations: impl IntoIterator<Item = ReplicaId>,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let mut outbound = BTreeMap::new();
        let mut unwired = BTreeMap::new();

        for dest in destinations {
            let (tx, rx) = mpsc::unbounded_channel();
            outbound.insert(dest, tx);
            unwired.insert(dest, rx);
        }

        Self {
            own_id,
            inbound_tx,
            inbound_rx,
            outbound,
            unwired,
        }
    }

    /// Returns the owning replica's id.
    pub fn own_id(&self) -> ReplicaId {
        self.own_id
    }

    /// Enqueues `msg` on the outbound channel towards `destination`.
    ///
    /// # Returns
    /// * `Err(EnvError::InvalidDestination)` - no outbound link to `destination`
    /// * `Err(EnvError::LinkClosed)` - the link draining this channel was dropped
    pub fn send(&self, destination: ReplicaId, msg: Message) -> Result<(), EnvError> {
        let tx = self
            .outbound
            .get(&destination)
            .ok_or(EnvError::InvalidDestination {
                sender: self.own_id,
                destination,
            })?;

        tx.send(msg)
            .map_err(|_| EnvError::link_closed(format!("{} -> {}", self.own_id, destination)))
    }

    /// Drains and returns, in arrival order, every message in the inbound channel.
    pub fn receive(&mut self) -> Vec<Message> {
        drain_all(&mut self.inbound_rx)
    }

    /// Returns a handle that links use to push into this mailbox.
    pub fn inbound_sender(&self) -> MessageSender {
        self.inbound_tx.clone()
    }

    /// Hands the receiving end of the outbound channel to `destination` to a link.
    ///
    /// Returns `None` if there is no such destination or it was already taken.
    pub fn take_outbound(&mut self, destination: ReplicaId) -> Option<MessageReceiver> {
        self.unwired.remove(&destination)
    }
}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("own_id", &self.own_id)
            .field("destinations", &self.outbound.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_to_unknown_destination_fails() {
        let mailbox = Mailbox::new(ReplicaId(0), 2);
        let err = mailbox
            .send(ReplicaId(5), Message::from_text("{}"))
            .unwrap_err();

        assert!(matches!(
            err,
            EnvError::InvalidDestination { destination: ReplicaId(5), .. }
        ));
    }

    #[test]
    fn test_send_lands_on_outbound_channel() {
        let mut mailbox = Mailbox::new(ReplicaId(0), 2);
        mailbox.send(ReplicaId(1), Message::from_text("a")).unwrap();
        mailbox.send(ReplicaId(1), Message::from_text("b")).unwrap();

        let mut rx = mailbox.take_outbound(ReplicaId(1)).unwrap();
        let drained: Vec<_> = drain_all(&mut rx).iter().map(|m| m.to_string()).collect();
        assert_eq!(drained, vec!["a", "b"]);

        // Taken once only
        assert!(mailbox.take_outbound(ReplicaId(1)).is_none());
    }

    #[test]
    fn test_receive_drains_in_arrival_order() {
        let mut mailbox = Mailbox::new(ReplicaId(1), 2);
        assert!(mailbox.receive().is_empty());

        let tx = mailbox.inbound_sender();
        tx.send(Message::from_text("1")).unwrap();
        tx.send(Message::from_text("2")).unwrap();

        let got: Vec<_> = mailbox.receive().iter().map(|m| m.to_string()).collect();
        assert_eq!(got, vec!["1", "2"]);
        assert!(mailbox.receive().is_empty());
    }

    #[test]
    fn test_send_after_link_dropped_reports_closed() {
        let mut mailbox = Mailbox::new(ReplicaId(0), 1);
        drop(mailbox.take_outbound(ReplicaId(0)));

        let err = mailbox.send(ReplicaId(0), Message::from_text("x")).unwrap_err();
        assert!(matches!(err, EnvError::LinkClosed(_)));
    }
}
