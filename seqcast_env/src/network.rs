//! Link and transport abstractions between replica mailboxes.

use crate::error::EnvError;
use crate::mailbox::{drain_all, MessageReceiver, MessageSender};
use crate::types::{Message, ReplicaId};

/// The channel endpoints of one directed edge `from → to`.
///
/// `source` is the sender's outbound channel towards `to`; `sink` pushes
/// into the receiver's inbound channel. A severed link still drains its
/// source but forwards nothing (simulated partition).
pub struct Link {
    from: ReplicaId,
    to: ReplicaId,
    source: MessageReceiver,
    sink: MessageSender,
    severed: bool,
}

impl Link {
    /// Creates a link from channel endpoints.
    pub fn new(from: ReplicaId, to: ReplicaId, source: MessageReceiver, sink: MessageSender) -> Self {
        Self {
            from,
            to,
            source,
            sink,
            severed: false,
        }
    }

    /// Returns `(from, to)`.
    pub fn endpoints(&self) -> (ReplicaId, ReplicaId) {
        (self.from, self.to)
    }

    /// Takes every message currently waiting on the sender side.
    pub fn drain_source(&mut self) -> Vec<Message> {
        drain_all(&mut self.source)
    }

    /// Pushes a message into the destination's inbound channel.
    pub fn forward(&self, msg: Message) -> Result<(), EnvError> {
        self.sink
            .send(msg)
            .map_err(|_| EnvError::link_closed(format!("{} -> {}", self.from, self.to)))
    }

    /// Returns true while the link is partitioned.
    pub fn is_severed(&self) -> bool {
        self.severed
    }

    /// Partitions (`true`) or heals (`false`) the link.
    pub fn set_severed(&mut self, severed: bool) {
        self.severed = severed;
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("severed", &self.severed)
            .finish()
    }
}

/// Outcome of one `deliver` call on a transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Messages pushed into the destination inbound channel
    pub forwarded: usize,

    /// Messages discarded by random loss (or a closed destination)
    pub dropped: usize,

    /// Messages discarded because the link is partitioned
    pub severed: usize,
}

impl DeliveryReport {
    /// Accumulates another report into this one.
    pub fn absorb(&mut self, other: DeliveryReport) {
        self.forwarded += other.forwarded;
        self.dropped += other.dropped;
        self.severed += other.severed;
    }
}

/// A directed edge that moves messages from one mailbox to another.
///
/// # Implementations
///
/// - **Reliable**: forwards everything immediately
/// - **Unreliable**: seeded random drop, then seeded random delay
///
/// # Contract
///
/// `deliver(now)` drains the source side of the link, and forwards every
/// message that is due at or before `now`. It never blocks.
pub trait Transport: Send {
    /// Moves due messages across the link at logical time `now`.
    fn deliver(&mut self, now: f64) -> DeliveryReport;

    /// Returns the underlying link mutably (for partition control).
    fn link_mut(&mut self) -> &mut Link;

    /// Number of messages accepted but not yet forwarded.
    fn in_flight(&self) -> usize {
        0
    }

    /// Tears the transport down into its link and the `(due, message)`
    /// pairs still in flight, so another transport can take over the edge.
    fn into_parts(self: Box<Self>) -> (Link, Vec<(f64, Message)>);
}

/// Fault injection over a set of links.
pub trait NetworkController {
    /// Severs every link between a node in `group_a` and a node in `group_b`.
    fn partition(&mut self, group_a: &[ReplicaId], group_b: &[ReplicaId]);

    /// Heals all partitions.
    fn heal_all(&mut self);

    /// Sets the delay range for a specific link.
    fn set_link_delay(
        &mut self,
        from: ReplicaId,
        to: ReplicaId,
        min_delay: f64,
        max_delay: f64,
    ) -> Result<(), EnvError>;

    /// Sets packet loss probability for a link (0.0 - 1.0).
    fn set_link_loss(&mut self, from: ReplicaId, to: ReplicaId, loss_rate: f64) -> Result<(), EnvError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::Mailbox;

    #[test]
    fn test_link_moves_between_mailboxes() {
        let mut a = Mailbox::new(ReplicaId(0), 2);
        let mut b = Mailbox::new(ReplicaId(1), 2);

        let mut link = Link::new(
            ReplicaId(0),
            ReplicaId(1),
            a.take_outbound(ReplicaId(1)).unwrap(),
            b.inbound_sender(),
        );

        a.send(ReplicaId(1), Message::from_text("hi")).unwrap();
        for msg in link.drain_source() {
            link.forward(msg).unwrap();
        }

        let got = b.receive();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].as_str(), "hi");
        assert_eq!(link.endpoints(), (ReplicaId(0), ReplicaId(1)));
    }

    #[test]
    fn test_report_absorb() {
        let mut total = DeliveryReport::default();
        total.absorb(DeliveryReport { forwarded: 2, dropped: 1, severed: 0 });
        total.absorb(DeliveryReport { forwarded: 1, dropped: 0, severed: 3 });
        assert_eq!(total, DeliveryReport { forwarded: 3, dropped: 1, severed: 3 });
    }
}
