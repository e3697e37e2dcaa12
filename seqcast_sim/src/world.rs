//! SimWorld - The simulation harness container.

use crate::context::SimContext;
use crate::network::{NetworkProfile, SimNetwork};
use crate::oracle::Oracle;

use seqcast_core::{Replica, ReplicaConfig, ReplicaError, ReplicaSnapshot, RequestId};
use seqcast_env::{EnvError, Mailbox, ReplicaId, RuntimeContext};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

/// Errors raised by the simulation driver itself.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("No such replica: {0}")]
    UnknownReplica(ReplicaId),

    #[error("Replica {0} is crashed")]
    Crashed(ReplicaId),

    #[error(transparent)]
    Replica(#[from] ReplicaError),

    #[error(transparent)]
    Env(#[from] EnvError),
}

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Number of replicas; replica 0 coordinates
    pub num_replicas: usize,

    /// Logical time added per tick
    pub time_step: f64,

    /// Behaviour of every link at start
    pub profile: NetworkProfile,

    /// Update replicas in a seeded random order instead of id order
    pub shuffle_updates: bool,

    /// Retry interval for both retransmission loops
    pub retry_interval: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            num_replicas: 2,
            time_step: 0.01,
            profile: NetworkProfile::Reliable,
            shuffle_updates: false,
            retry_interval: 1.0,
        }
    }
}

impl SimConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_replicas(mut self, num_replicas: usize) -> Self {
        self.num_replicas = num_replicas;
        self
    }

    pub fn with_profile(mut self, profile: NetworkProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_time_step(mut self, time_step: f64) -> Self {
        self.time_step = time_step;
        self
    }

    pub fn with_shuffle(mut self, shuffle_updates: bool) -> Self {
        self.shuffle_updates = shuffle_updates;
        self
    }

    pub fn with_retry_interval(mut self, retry_interval: f64) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    fn validate(&self) -> Result<(), EnvError> {
        if self.num_replicas == 0 {
            return Err(EnvError::config("at least one replica is required"));
        }
        if !(self.time_step > 0.0 && self.time_step.is_finite()) {
            return Err(EnvError::config(format!("invalid time step {}", self.time_step)));
        }
        if !(self.retry_interval > 0.0) {
            return Err(EnvError::config(format!(
                "invalid retry interval {}",
                self.retry_interval
            )));
        }
        Ok(())
    }
}

/// The SimWorld - container for the entire simulation.
///
/// Owns the virtual clock, every replica and all N×N links (self-links
/// included). One `tick` delivers on every link, then updates every live
/// replica, then advances the clock.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    /// Shared simulation context (virtual clock + RNG)
    pub context: Arc<SimContext>,

    /// Records submissions and checks replica agreement
    pub oracle: Oracle,

    network: SimNetwork,
    replicas: Vec<Replica>,

    /// Current tick count
    tick_count: u64,

    /// Replica updates that returned an error
    update_errors: u64,
}

impl SimWorld {
    /// Creates replicas, wires every link and starts the clock at 0.
    pub fn new(config: SimConfig) -> Result<Self, EnvError> {
        config.validate()?;

        let context = SimContext::shared(config.seed);
        let replica_config = ReplicaConfig::default()
            .with_replicas(config.num_replicas)
            .with_retry_interval(config.retry_interval);

        let mut replicas: Vec<Replica> = ReplicaId::range(config.num_replicas)
            .map(|id| Replica::new(Mailbox::new(id, config.num_replicas), replica_config.clone()))
            .collect();

        let network = SimNetwork::wire(&mut replicas, config.profile.link_profile(), context.rng())?;

        info!(
            seed = config.seed,
            replicas = config.num_replicas,
            profile = %config.profile,
            "simulation world created"
        );

        Ok(Self {
            config,
            context,
            oracle: Oracle::new(),
            network,
            replicas,
            tick_count: 0,
            update_errors: 0,
        })
    }

    /// Advances simulation by one tick.
    pub fn tick(&mut self) {
        let now = self.time();

        self.network.deliver_all(now);

        let mut order: Vec<usize> = (0..self.replicas.len())
            .filter(|&i| !self.replicas[i].is_crashed())
            .collect();
        if self.config.shuffle_updates {
            self.context.rng().shuffle(&mut order);
        }

        for i in order {
            let replica = &mut self.replicas[i];
            if let Err(e) = replica.update(now) {
                self.update_errors += 1;
                error!(replica = %replica.id(), now, error = %e, "replica update failed");
            }
        }

        self.context
            .advance_time(Duration::from_secs_f64(self.config.time_step));
        self.tick_count += 1;
    }

    /// Number of ticks covering `duration` logical units.
    pub fn ticks_for(&self, duration: f64) -> u64 {
        (duration / self.config.time_step).round().max(0.0) as u64
    }

    /// Runs ticks until `duration` logical units have passed.
    pub fn run_for(&mut self, duration: f64) {
        for _ in 0..self.ticks_for(duration) {
            self.tick();
        }
    }

    /// Ticks until `done` holds or `max_duration` passes. Returns whether
    /// `done` was reached.
    pub fn run_until<F>(&mut self, max_duration: f64, mut done: F) -> bool
    where
        F: FnMut(&SimWorld) -> bool,
    {
        for _ in 0..self.ticks_for(max_duration) {
            if done(self) {
                return true;
            }
            self.tick();
        }
        done(self)
    }

    /// Ticks with a real (or virtual) sleep on `pacer` between ticks.
    ///
    /// Delivery still precedes updates inside every tick.
    pub async fn run_paced<P: RuntimeContext>(&mut self, pacer: &P, ticks: u64) {
        let pause = Duration::from_secs_f64(self.config.time_step);
        for _ in 0..ticks {
            self.tick();
            pacer.sleep(pause).await;
        }
    }

    /// Asks `replica` to submit `value` for global ordering.
    pub fn submit(&mut self, replica: ReplicaId, value: &str) -> Result<RequestId, SimError> {
        let now = self.time();
        let target = self.replica_mut(replica)?;
        if target.is_crashed() {
            return Err(SimError::Crashed(replica));
        }

        let req_id = target.create_entry(value, now)?;
        self.oracle.record(replica, value, now);
        Ok(req_id)
    }

    /// Stops updating `replica`; its inbound channel keeps filling.
    pub fn crash(&mut self, replica: ReplicaId) -> Result<(), SimError> {
        self.replica_mut(replica)?.set_crashed(true);
        Ok(())
    }

    /// Resumes updating `replica` with its state intact.
    pub fn recover(&mut self, replica: ReplicaId) -> Result<(), SimError> {
        self.replica_mut(replica)?.set_crashed(false);
        Ok(())
    }

    /// Snapshots of every replica, crashed ones included.
    pub fn snapshots(&self) -> Vec<ReplicaSnapshot> {
        self.replicas.iter().map(Replica::snapshot).collect()
    }

    /// True once nothing is in flight or waiting for an acknowledgement.
    pub fn is_quiescent(&self) -> bool {
        self.network.in_flight() == 0
            && self.replicas.iter().all(|r| {
                r.submitter().pending_count() == 0
                    && r.sequencer().map_or(true, |s| s.outstanding_count() == 0)
            })
    }

    pub fn replica(&self, id: ReplicaId) -> Option<&Replica> {
        self.replicas.get(id.index())
    }

    fn replica_mut(&mut self, id: ReplicaId) -> Result<&mut Replica, SimError> {
        self.replicas
            .get_mut(id.index())
            .ok_or(SimError::UnknownReplica(id))
    }

    pub fn replicas(&self) -> &[Replica] {
        &self.replicas
    }

    pub fn replica_ids(&self) -> Vec<ReplicaId> {
        self.replicas.iter().map(Replica::id).collect()
    }

    pub fn network(&self) -> &SimNetwork {
        &self.network
    }

    /// Network access for fault injection.
    pub fn network_mut(&mut self) -> &mut SimNetwork {
        &mut self.network
    }

    /// Returns the current simulation time in logical units.
    pub fn time(&self) -> f64 {
        self.context.now_secs()
    }

    /// Returns the current tick count.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn update_errors(&self) -> u64 {
        self.update_errors
    }

    /// Logs a one-line summary per replica.
    pub fn log_state(&self) {
        for snapshot in self.snapshots() {
            debug!(
                replica = %snapshot.replica,
                len = snapshot.len,
                crashed = snapshot.crashed,
                hash = %snapshot.hash,
                "replica state"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seqcast_env::NetworkController;

    fn world(profile: NetworkProfile, seed: u64) -> SimWorld {
        SimWorld::new(SimConfig::default().with_seed(seed).with_profile(profile)).unwrap()
    }

    #[test]
    fn test_sim_world_creation() {
        let world = SimWorld::new(SimConfig::default().with_replicas(3)).unwrap();

        assert_eq!(world.replicas().len(), 3);
        assert_eq!(world.network().link_count(), 9);
        assert_eq!(world.time(), 0.0);
        assert_eq!(world.tick_count(), 0);
        assert!(world.replica(ReplicaId(0)).unwrap().is_coordinator());
        assert!(!world.replica(ReplicaId(2)).unwrap().is_coordinator());
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(SimWorld::new(SimConfig::default().with_replicas(0)).is_err());
        assert!(SimWorld::new(SimConfig::default().with_time_step(0.0)).is_err());
        assert!(SimWorld::new(SimConfig::default().with_time_step(f64::INFINITY)).is_err());
        assert!(SimWorld::new(SimConfig::default().with_time_step(f64::NAN)).is_err());
    }

    #[test]
    fn test_tick_advances_clock() {
        let mut world = world(NetworkProfile::Reliable, 1);
        world.run_for(1.0);

        assert_eq!(world.tick_count(), 100);
        assert!((world.time() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_reliable_replication() {
        let mut world = world(NetworkProfile::Reliable, 1);
        world.submit(ReplicaId(0), "a").unwrap();
        world.submit(ReplicaId(1), "b").unwrap();
        world.run_for(1.0);

        let snaps = world.snapshots();
        assert_eq!(snaps[0].values(), vec!["a", "b"]);
        assert_eq!(snaps[0].entries, snaps[1].entries);
        assert_eq!(snaps[0].hash, snaps[1].hash);
        assert!(world.is_quiescent());
        assert_eq!(world.update_errors(), 0);
    }

    #[test]
    fn test_adverse_two_values_each() {
        let mut world = world(NetworkProfile::Adverse, 7);
        for value in ["r0-a", "r0-b"] {
            world.submit(ReplicaId(0), value).unwrap();
        }
        for value in ["r1-a", "r1-b"] {
            world.submit(ReplicaId(1), value).unwrap();
        }

        assert!(world.run_until(200.0, |w| w.is_quiescent()));

        let snaps = world.snapshots();
        assert_eq!(snaps[0].len, 4);
        assert_eq!(snaps[0].entries, snaps[1].entries);
        assert_eq!(snaps[0].hash, snaps[1].hash);
        assert!(world.oracle.check_convergence(&snaps).is_ok());
    }

    #[test]
    fn test_crashed_replica_catches_up() {
        let mut world = world(NetworkProfile::Moderate, 3);
        world.crash(ReplicaId(1)).unwrap();
        world.submit(ReplicaId(0), "while-down").unwrap();
        world.run_for(5.0);

        assert_eq!(world.snapshots()[1].len, 0);
        assert!(world.snapshots()[1].crashed);
        assert!(world.submit(ReplicaId(1), "nope").is_err());

        world.recover(ReplicaId(1)).unwrap();
        assert!(world.run_until(50.0, |w| w.is_quiescent()));
        assert_eq!(world.snapshots()[1].values(), vec!["while-down"]);
    }

    #[test]
    fn test_partition_then_heal() {
        let mut world = world(NetworkProfile::Reliable, 5);
        world
            .network_mut()
            .partition(&[ReplicaId(0)], &[ReplicaId(1)]);
        world.submit(ReplicaId(1), "queued").unwrap();
        world.run_for(3.0);
        assert_eq!(world.snapshots()[0].len, 0);

        world.network_mut().heal_all();
        assert!(world.run_until(10.0, |w| w.is_quiescent()));
        let snaps = world.snapshots();
        assert_eq!(snaps[0].values(), vec!["queued"]);
        assert_eq!(snaps[1].values(), vec!["queued"]);
    }

    #[test]
    fn test_failing_update_does_not_stall_tick() {
        let mut world = SimWorld::new(SimConfig::default().with_replicas(3)).unwrap();
        // r1 can no longer reach the coordinator, so its acks fail to send
        assert!(world.network_mut().disconnect(ReplicaId(1), ReplicaId(0)));

        world.submit(ReplicaId(2), "v").unwrap();
        world.tick();
        assert_eq!(world.update_errors(), 0);

        // propagate reaches every replica in this tick
        world.tick();
        assert_eq!(world.update_errors(), 1);
        let snaps = world.snapshots();
        assert!(snaps[1].entries.is_empty());
        assert_eq!(snaps[2].values(), vec!["v"]);
        assert_eq!(snaps[0].values(), vec!["v"]);
    }

    #[test]
    fn test_unknown_replica() {
        let mut world = world(NetworkProfile::Reliable, 1);
        assert!(matches!(
            world.crash(ReplicaId(9)),
            Err(SimError::UnknownReplica(ReplicaId(9)))
        ));
    }

    #[test]
    fn test_same_seed_same_run() {
        let run = |seed| {
            let mut world = SimWorld::new(
                SimConfig::default()
                    .with_seed(seed)
                    .with_replicas(3)
                    .with_profile(NetworkProfile::Adverse)
                    .with_shuffle(true),
            )
            .unwrap();
            for i in 0..3 {
                world.submit(ReplicaId(i), &format!("v{}", i)).unwrap();
            }
            world.run_for(20.0);
            world.snapshots()
        };

        assert_eq!(run(11), run(11));
    }

    #[tokio::test]
    async fn test_run_paced_on_virtual_clock() {
        let mut world = world(NetworkProfile::Reliable, 1);
        let pacer = SimContext::new(0);
        world.submit(ReplicaId(1), "paced").unwrap();
        world.run_paced(&pacer, 50).await;

        assert_eq!(world.tick_count(), 50);
        assert!((pacer.now_secs() - 0.5).abs() < 1e-9);
        assert_eq!(world.snapshots()[0].values(), vec!["paced"]);
    }
}
