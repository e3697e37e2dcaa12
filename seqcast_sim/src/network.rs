//! Simulated links with seeded drop/delay and partition control.

use crate::context::SimRng;
use seqcast_core::Replica;
use seqcast_env::{DeliveryReport, EnvError, Link, Message, NetworkController, ReplicaId, Transport};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Behaviour of one link.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LinkProfile {
    /// Immediate, lossless
    Reliable,

    /// Drop with probability `drop_rate`, otherwise delay uniformly in
    /// `[min_delay, max_delay]`
    Unreliable {
        min_delay: f64,
        max_delay: f64,
        drop_rate: f64,
    },
}

impl LinkProfile {
    /// Checks delay ordering, finiteness and drop probability range.
    pub fn validate(&self) -> Result<(), EnvError> {
        if let LinkProfile::Unreliable {
            min_delay,
            max_delay,
            drop_rate,
        } = *self
        {
            if !(min_delay >= 0.0 && min_delay <= max_delay && max_delay.is_finite()) {
                return Err(EnvError::config(format!(
                    "invalid delay range [{}, {}]",
                    min_delay, max_delay
                )));
            }
            if !(0.0..=1.0).contains(&drop_rate) {
                return Err(EnvError::config(format!("invalid drop rate {}", drop_rate)));
            }
        }
        Ok(())
    }

    fn unreliable_parts(&self) -> (f64, f64, f64) {
        match *self {
            LinkProfile::Reliable => (0.0, 0.0, 0.0),
            LinkProfile::Unreliable {
                min_delay,
                max_delay,
                drop_rate,
            } => (min_delay, max_delay, drop_rate),
        }
    }
}

/// Network-wide presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkProfile {
    /// No delay, no loss
    Reliable,

    /// 0.5-1.5 delay, no loss
    Moderate,

    /// 0.5-1.5 delay, 10% loss
    Adverse,
}

impl NetworkProfile {
    pub fn link_profile(&self) -> LinkProfile {
        match self {
            NetworkProfile::Reliable => LinkProfile::Reliable,
            NetworkProfile::Moderate => LinkProfile::Unreliable {
                min_delay: 0.5,
                max_delay: 1.5,
                drop_rate: 0.0,
            },
            NetworkProfile::Adverse => LinkProfile::Unreliable {
                min_delay: 0.5,
                max_delay: 1.5,
                drop_rate: 0.1,
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            NetworkProfile::Reliable => "reliable",
            NetworkProfile::Moderate => "moderate",
            NetworkProfile::Adverse => "adverse",
        }
    }
}

impl std::fmt::Display for NetworkProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for NetworkProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reliable" | "easy" => Ok(NetworkProfile::Reliable),
            "moderate" | "medium" => Ok(NetworkProfile::Moderate),
            "adverse" | "hard" => Ok(NetworkProfile::Adverse),
            _ => Err(format!("Unknown network profile: {}", s)),
        }
    }
}

/// Forwards immediately, never drops.
pub struct ReliableTransport {
    link: Link,

    /// Messages inherited from a previous transport on this edge
    backlog: Vec<Message>,
}

impl ReliableTransport {
    pub fn new(link: Link) -> Self {
        Self {
            link,
            backlog: Vec::new(),
        }
    }
}

impl Transport for ReliableTransport {
    fn deliver(&mut self, _now: f64) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let mut msgs = std::mem::take(&mut self.backlog);
        msgs.extend(self.link.drain_source());

        for msg in msgs {
            if self.link.is_severed() {
                report.severed += 1;
                continue;
            }
            match self.link.forward(msg) {
                Ok(()) => report.forwarded += 1,
                Err(_) => report.dropped += 1,
            }
        }
        report
    }

    fn link_mut(&mut self) -> &mut Link {
        &mut self.link
    }

    fn in_flight(&self) -> usize {
        self.backlog.len()
    }

    fn into_parts(self: Box<Self>) -> (Link, Vec<(f64, Message)>) {
        let pending = self.backlog.into_iter().map(|m| (0.0, m)).collect();
        (self.link, pending)
    }
}

/// Seeded random drop, then seeded random delay.
///
/// Accepted messages wait in an unbounded buffer, in arrival order, until
/// their scheduled time.
pub struct UnreliableTransport {
    link: Link,
    rng: SimRng,
    min_delay: f64,
    max_delay: f64,
    drop_rate: f64,

    /// `(delivery_time, message)` in arrival order
    buffered: Vec<(f64, Message)>,
}

impl UnreliableTransport {
    /// Creates a link with zero delay and no loss; configure with the setters.
    pub fn new(link: Link, rng: SimRng) -> Self {
        Self {
            link,
            rng,
            min_delay: 0.0,
            max_delay: 0.0,
            drop_rate: 0.0,
            buffered: Vec::new(),
        }
    }

    /// Builds a transport from a profile, carrying over in-flight messages.
    pub fn from_profile(
        link: Link,
        rng: SimRng,
        profile: LinkProfile,
        in_flight: Vec<(f64, Message)>,
    ) -> Result<Self, EnvError> {
        profile.validate()?;
        let (min_delay, max_delay, drop_rate) = profile.unreliable_parts();
        Ok(Self {
            link,
            rng,
            min_delay,
            max_delay,
            drop_rate,
            buffered: in_flight,
        })
    }

    /// Sets the probability of dropping a message (0.0 to 1.0).
    pub fn set_drop_rate(&mut self, drop_rate: f64) -> Result<(), EnvError> {
        LinkProfile::Unreliable {
            min_delay: self.min_delay,
            max_delay: self.max_delay,
            drop_rate,
        }
        .validate()?;
        self.drop_rate = drop_rate;
        Ok(())
    }

    /// Sets the range of random delays.
    pub fn set_delay(&mut self, min_delay: f64, max_delay: f64) -> Result<(), EnvError> {
        LinkProfile::Unreliable {
            min_delay,
            max_delay,
            drop_rate: self.drop_rate,
        }
        .validate()?;
        self.min_delay = min_delay;
        self.max_delay = max_delay;
        Ok(())
    }

}

impl Transport for UnreliableTransport {
    fn deliver(&mut self, now: f64) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let (from, to) = self.link.endpoints();

        // Pull new messages: drop or schedule
        for msg in self.link.drain_source() {
            if self.link.is_severed() {
                report.severed += 1;
                continue;
            }
            if self.rng.uniform() < self.drop_rate {
                debug!(%from, %to, now, %msg, "dropping message");
                report.dropped += 1;
                continue;
            }
            let delay = self.rng.uniform_range(self.min_delay, self.max_delay);
            self.buffered.push((now + delay, msg));
        }

        // Forward what is due, keep the rest in arrival order
        let mut remaining = Vec::with_capacity(self.buffered.len());
        for (due, msg) in self.buffered.drain(..) {
            if due > now {
                remaining.push((due, msg));
                continue;
            }
            if self.link.is_severed() {
                report.severed += 1;
                continue;
            }
            match self.link.forward(msg) {
                Ok(()) => report.forwarded += 1,
                Err(_) => report.dropped += 1,
            }
        }
        self.buffered = remaining;

        report
    }

    fn link_mut(&mut self) -> &mut Link {
        &mut self.link
    }

    fn in_flight(&self) -> usize {
        self.buffered.len()
    }

    fn into_parts(self: Box<Self>) -> (Link, Vec<(f64, Message)>) {
        (self.link, self.buffered)
    }
}

/// Cumulative network statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkStats {
    pub messages_forwarded: u64,
    pub messages_dropped: u64,
    pub messages_severed: u64,
    pub partitions_created: u64,
    pub partitions_healed: u64,
}

struct LinkSlot {
    transport: Box<dyn Transport>,
    profile: LinkProfile,
}

/// All links of a simulated cluster, delivered in `(from, to)` order.
pub struct SimNetwork {
    links: BTreeMap<(ReplicaId, ReplicaId), LinkSlot>,
    rng: SimRng,

    /// Active partitions (replicas that cannot communicate)
    partitions: Vec<(Vec<ReplicaId>, Vec<ReplicaId>)>,

    stats: NetworkStats,
}

impl SimNetwork {
    /// Creates an empty network drawing randomness from `rng`.
    pub fn new(rng: SimRng) -> Self {
        Self {
            links: BTreeMap::new(),
            rng,
            partitions: Vec::new(),
            stats: NetworkStats::default(),
        }
    }

    /// Connects every replica to every replica (itself included).
    pub fn wire(replicas: &mut [Replica], profile: LinkProfile, rng: SimRng) -> Result<Self, EnvError> {
        let mut network = Self::new(rng);
        let sinks: Vec<_> = replicas
            .iter_mut()
            .map(|r| (r.id(), r.mailbox_mut().inbound_sender()))
            .collect();

        for replica in replicas.iter_mut() {
            let from = replica.id();
            for (to, sink) in &sinks {
                let source = replica.mailbox_mut().take_outbound(*to).ok_or_else(|| {
                    EnvError::config(format!("{} has no unwired outbound channel to {}", from, to))
                })?;
                network.connect(Link::new(from, *to, source, sink.clone()), profile)?;
            }
        }

        Ok(network)
    }

    /// Adds a link with the given behaviour.
    pub fn connect(&mut self, link: Link, profile: LinkProfile) -> Result<(), EnvError> {
        let key = link.endpoints();
        let transport = self.build(link, profile, Vec::new())?;
        self.links.insert(key, LinkSlot { transport, profile });
        Ok(())
    }

    fn build(
        &self,
        link: Link,
        profile: LinkProfile,
        in_flight: Vec<(f64, Message)>,
    ) -> Result<Box<dyn Transport>, EnvError> {
        Ok(match profile {
            LinkProfile::Reliable => {
                let mut transport = ReliableTransport::new(link);
                transport.backlog = in_flight.into_iter().map(|(_, m)| m).collect();
                Box::new(transport)
            }
            LinkProfile::Unreliable { .. } => Box::new(UnreliableTransport::from_profile(
                link,
                self.rng.clone(),
                profile,
                in_flight,
            )?),
        })
    }

    /// Removes a link and everything in flight on it. Later sends on the
    /// edge fail with `EnvError::LinkClosed`.
    pub fn disconnect(&mut self, from: ReplicaId, to: ReplicaId) -> bool {
        self.links.remove(&(from, to)).is_some()
    }

    /// Changes a link's behaviour, keeping messages already in flight.
    pub fn set_profile(
        &mut self,
        from: ReplicaId,
        to: ReplicaId,
        profile: LinkProfile,
    ) -> Result<(), EnvError> {
        profile.validate()?;
        let slot = self
            .links
            .remove(&(from, to))
            .ok_or_else(|| EnvError::config(format!("no link {} -> {}", from, to)))?;

        let (link, in_flight) = slot.transport.into_parts();
        let transport = self.build(link, profile, in_flight)?;
        self.links.insert((from, to), LinkSlot { transport, profile });
        Ok(())
    }

    /// Applies one profile to every link.
    pub fn set_all_profiles(&mut self, profile: LinkProfile) -> Result<(), EnvError> {
        let keys: Vec<_> = self.links.keys().copied().collect();
        for (from, to) in keys {
            self.set_profile(from, to, profile)?;
        }
        Ok(())
    }

    pub fn profile(&self, from: ReplicaId, to: ReplicaId) -> Option<LinkProfile> {
        self.links.get(&(from, to)).map(|slot| slot.profile)
    }

    /// Runs `deliver(now)` on every link in `(from, to)` order.
    pub fn deliver_all(&mut self, now: f64) -> DeliveryReport {
        let mut total = DeliveryReport::default();
        for slot in self.links.values_mut() {
            total.absorb(slot.transport.deliver(now));
        }

        self.stats.messages_forwarded += total.forwarded as u64;
        self.stats.messages_dropped += total.dropped as u64;
        self.stats.messages_severed += total.severed as u64;
        total
    }

    /// Messages accepted by links but not yet forwarded.
    pub fn in_flight(&self) -> usize {
        self.links.values().map(|s| s.transport.in_flight()).sum()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    /// Checks if two replicas can communicate (not partitioned).
    pub fn can_communicate(&self, from: ReplicaId, to: ReplicaId) -> bool {
        !self.partitions.iter().any(|(a, b)| crosses(a, b, from, to))
    }

    fn refresh_severed(&mut self) {
        let partitions = &self.partitions;
        for ((from, to), slot) in self.links.iter_mut() {
            let severed = partitions.iter().any(|(a, b)| crosses(a, b, *from, *to));
            slot.transport.link_mut().set_severed(severed);
        }
    }
}

fn crosses(a: &[ReplicaId], b: &[ReplicaId], from: ReplicaId, to: ReplicaId) -> bool {
    (a.contains(&from) && b.contains(&to)) || (b.contains(&from) && a.contains(&to))
}

impl NetworkController for SimNetwork {
    fn partition(&mut self, group_a: &[ReplicaId], group_b: &[ReplicaId]) {
        self.partitions.push((group_a.to_vec(), group_b.to_vec()));
        self.stats.partitions_created += 1;
        self.refresh_severed();
    }

    fn heal_all(&mut self) {
        self.stats.partitions_healed += self.partitions.len() as u64;
        self.partitions.clear();
        self.refresh_severed();
    }

    fn set_link_delay(
        &mut self,
        from: ReplicaId,
        to: ReplicaId,
        min_delay: f64,
        max_delay: f64,
    ) -> Result<(), EnvError> {
        let current = self
            .profile(from, to)
            .ok_or_else(|| EnvError::config(format!("no link {} -> {}", from, to)))?;
        let (_, _, drop_rate) = current.unreliable_parts();
        self.set_profile(
            from,
            to,
            LinkProfile::Unreliable {
                min_delay,
                max_delay,
                drop_rate,
            },
        )
    }

    fn set_link_loss(&mut self, from: ReplicaId, to: ReplicaId, loss_rate: f64) -> Result<(), EnvError> {
        let current = self
            .profile(from, to)
            .ok_or_else(|| EnvError::config(format!("no link {} -> {}", from, to)))?;
        let (min_delay, max_delay, _) = current.unreliable_parts();
        self.set_profile(
            from,
            to,
            LinkProfile::Unreliable {
                min_delay,
                max_delay,
                drop_rate: loss_rate,
            },
        )
    }
}
