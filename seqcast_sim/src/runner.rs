//! Scenario runner - executes fault scenarios against a SimWorld.

use crate::exporter::{SimEvent, SimExport, SimFrame};
use crate::network::{LinkProfile, NetworkProfile};
use crate::oracle::Violation;
use crate::scenarios::ScenarioId;
use crate::world::{SimConfig, SimError, SimWorld};

use seqcast_env::{NetworkController, ReplicaId};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total ticks executed
    pub total_ticks: u64,

    /// Final simulation time in logical units
    pub final_time_secs: f64,

    /// Board length of the first live replica at the end
    pub entries: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    /// Messages that reached a mailbox
    pub messages_forwarded: u64,

    /// Messages lost to random drop
    pub messages_dropped: u64,

    /// Messages lost to partitions
    pub messages_severed: u64,

    /// `propagate` retransmissions by the coordinator
    pub propagate_retries: u64,

    /// `add_entry` resends by submitters
    pub submit_resends: u64,

    /// Duplicate deliveries absorbed by the applied set
    pub duplicates_absorbed: u64,

    /// Messages discarded as protocol violations
    pub protocol_errors: u64,

    /// Logical time at which the world went quiet
    pub settled_at: Option<f64>,
}

/// Why a scenario run failed.
#[derive(Debug, Error)]
enum RunFailure {
    #[error("{0}")]
    Violation(#[from] Violation),

    #[error("{0}")]
    Sim(#[from] SimError),

    #[error("scenario needs at least {needed} replicas, got {got}")]
    TooFewReplicas { needed: usize, got: usize },

    #[error("did not settle within {0} time units")]
    Unsettled(f64),

    #[error("{0} replica updates failed")]
    UpdateErrors(u64),
}

/// Captures frames and checks prefix agreement while the world runs.
struct Recorder {
    export: Option<SimExport>,
    interval: u64,
    pending_events: Vec<SimEvent>,
}

impl Recorder {
    fn new(export: Option<SimExport>, interval: u64) -> Self {
        Self {
            export,
            interval: interval.max(1),
            pending_events: Vec::new(),
        }
    }

    fn event(&mut self, world: &SimWorld, message: String) {
        info!(time = world.time(), "{}", message);
        self.pending_events.push(SimEvent {
            time_sec: world.time(),
            message,
        });
    }

    fn observe(&mut self, world: &SimWorld) -> Result<(), Violation> {
        let snapshots = world.snapshots();
        world.oracle.check_prefix_agreement(&snapshots)?;

        if let Some(export) = self.export.as_mut() {
            if world.tick_count() % self.interval == 0 || !self.pending_events.is_empty() {
                let mut frame = SimFrame::capture(world.time(), &snapshots);
                frame.events = std::mem::take(&mut self.pending_events);
                export.add_frame(frame);
            }
        }
        Ok(())
    }
}

/// Runs fault scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Number of replicas
    num_replicas: usize,

    /// Values each replica submits
    entries_per_replica: usize,

    /// Link behaviour at start
    profile: NetworkProfile,

    /// Longest time allowed to settle after the fault script
    max_duration_secs: f64,

    /// Seeded random update order
    shuffle: bool,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64, num_replicas: usize) -> Self {
        Self {
            seed,
            num_replicas,
            entries_per_replica: 2,
            profile: NetworkProfile::Adverse,
            max_duration_secs: 200.0,
            shuffle: false,
        }
    }

    /// Sets the values submitted per replica.
    pub fn with_entries(mut self, entries: usize) -> Self {
        self.entries_per_replica = entries;
        self
    }

    /// Sets the network preset.
    pub fn with_profile(mut self, profile: NetworkProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Sets the maximum duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    /// Enables seeded random update order.
    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    fn config(&self) -> SimConfig {
        SimConfig::default()
            .with_seed(self.seed)
            .with_replicas(self.num_replicas)
            .with_profile(self.profile)
            .with_shuffle(self.shuffle)
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.execute(scenario, Recorder::new(None, 1)).0
    }

    /// Runs a scenario, capturing a frame every `interval` ticks.
    pub fn run_exported(&self, scenario: ScenarioId, interval: u64) -> (ScenarioResult, SimExport) {
        let export = SimExport::new(scenario.name(), self.seed, self.profile.name());
        let (result, export) = self.execute(scenario, Recorder::new(Some(export), interval));
        let mut export = export.unwrap_or_else(|| {
            SimExport::new(scenario.name(), self.seed, self.profile.name())
        });
        export.finalize(result.passed, result.failure_reason.clone());
        (result, export)
    }

    fn execute(&self, scenario: ScenarioId, mut recorder: Recorder) -> (ScenarioResult, Option<SimExport>) {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let mut world = match SimWorld::new(self.config()) {
            Ok(world) => world,
            Err(e) => {
                let result = ScenarioResult {
                    scenario,
                    seed: self.seed,
                    passed: false,
                    total_ticks: 0,
                    final_time_secs: 0.0,
                    entries: 0,
                    failure_reason: Some(e.to_string()),
                    metrics: ScenarioMetrics::default(),
                };
                return (result, recorder.export);
            }
        };

        let outcome = self.script(scenario, &mut world, &mut recorder).and_then(|()| {
            let settled_at = self.settle(&mut world, &mut recorder)?;
            world.oracle.check_convergence(&world.snapshots())?;
            if world.update_errors() > 0 {
                return Err(RunFailure::UpdateErrors(world.update_errors()));
            }
            Ok(settled_at)
        });

        let mut metrics = collect_metrics(&world);
        let failure_reason = match outcome {
            Ok(settled_at) => {
                metrics.settled_at = Some(settled_at);
                None
            }
            Err(e) => {
                warn!(scenario = scenario.name(), seed = self.seed, error = %e, "scenario failed");
                Some(e.to_string())
            }
        };

        world.log_state();
        let entries = world
            .snapshots()
            .iter()
            .find(|s| !s.crashed)
            .map_or(0, |s| s.len);

        let result = ScenarioResult {
            scenario,
            seed: self.seed,
            passed: failure_reason.is_none(),
            total_ticks: world.tick_count(),
            final_time_secs: world.time(),
            entries,
            failure_reason,
            metrics,
        };
        (result, recorder.export)
    }

    fn script(
        &self,
        scenario: ScenarioId,
        world: &mut SimWorld,
        recorder: &mut Recorder,
    ) -> Result<(), RunFailure> {
        match scenario {
            ScenarioId::Baseline => self.run_baseline(world),
            ScenarioId::PartitionHeal => self.run_partition_heal(world, recorder),
            ScenarioId::CoordinatorCrash => self.run_coordinator_crash(world, recorder),
            ScenarioId::FollowerCrash => self.run_follower_crash(world, recorder),
            ScenarioId::HeavyLoss => self.run_heavy_loss(world, recorder),
        }
    }

    fn submit_all(&self, world: &mut SimWorld, replica: ReplicaId) -> Result<(), RunFailure> {
        for k in 1..=self.entries_per_replica {
            world.submit(replica, &format!("{}-v{}", replica, k))?;
        }
        Ok(())
    }

    fn require_replicas(&self, needed: usize) -> Result<(), RunFailure> {
        if self.num_replicas < needed {
            return Err(RunFailure::TooFewReplicas {
                needed,
                got: self.num_replicas,
            });
        }
        Ok(())
    }

    fn advance(&self, world: &mut SimWorld, duration: f64, recorder: &mut Recorder) -> Result<(), RunFailure> {
        for _ in 0..world.ticks_for(duration) {
            world.tick();
            recorder.observe(world)?;
        }
        Ok(())
    }

    /// Ticks until the world is quiet; returns the time it happened.
    fn settle(&self, world: &mut SimWorld, recorder: &mut Recorder) -> Result<f64, RunFailure> {
        for _ in 0..world.ticks_for(self.max_duration_secs) {
            if world.is_quiescent() {
                debug!(time = world.time(), "world settled");
                return Ok(world.time());
            }
            world.tick();
            recorder.observe(world)?;
        }
        if world.is_quiescent() {
            return Ok(world.time());
        }
        Err(RunFailure::Unsettled(self.max_duration_secs))
    }

    /// Every replica submits up front.
    fn run_baseline(&self, world: &mut SimWorld) -> Result<(), RunFailure> {
        info!("baseline: {} replicas x {} values", self.num_replicas, self.entries_per_replica);
        for id in world.replica_ids() {
            self.submit_all(world, id)?;
        }
        Ok(())
    }

    /// The last replica is cut off while both sides submit.
    fn run_partition_heal(&self, world: &mut SimWorld, recorder: &mut Recorder) -> Result<(), RunFailure> {
        self.require_replicas(2)?;
        let ids = world.replica_ids();
        let (majority, isolated) = ids.split_at(ids.len() - 1);

        world.network_mut().partition(majority, isolated);
        recorder.event(world, format!("partitioned {:?} from {:?}", majority, isolated));

        for id in &ids {
            self.submit_all(world, *id)?;
        }
        self.advance(world, 5.0, recorder)?;

        world.network_mut().heal_all();
        recorder.event(world, "healed all partitions".to_string());
        Ok(())
    }

    /// The coordinator goes down after its own submissions.
    fn run_coordinator_crash(&self, world: &mut SimWorld, recorder: &mut Recorder) -> Result<(), RunFailure> {
        let ids = world.replica_ids();
        let coordinator = ids[0];

        self.submit_all(world, coordinator)?;
        self.advance(world, 1.0, recorder)?;

        world.crash(coordinator)?;
        recorder.event(world, format!("crashed coordinator {}", coordinator));

        for id in &ids[1..] {
            self.submit_all(world, *id)?;
        }
        self.advance(world, 5.0, recorder)?;

        world.recover(coordinator)?;
        recorder.event(world, format!("recovered coordinator {}", coordinator));
        Ok(())
    }

    /// A follower misses broadcasts and drains its backlog on recovery.
    fn run_follower_crash(&self, world: &mut SimWorld, recorder: &mut Recorder) -> Result<(), RunFailure> {
        self.require_replicas(2)?;
        let ids = world.replica_ids();
        let (live, down) = ids.split_at(ids.len() - 1);
        let follower = down[0];

        world.crash(follower)?;
        recorder.event(world, format!("crashed follower {}", follower));

        for id in live {
            self.submit_all(world, *id)?;
        }
        self.advance(world, 5.0, recorder)?;

        world.recover(follower)?;
        recorder.event(world, format!("recovered follower {}", follower));
        self.submit_all(world, follower)?;
        Ok(())
    }

    /// Every link loses 40% of messages.
    fn run_heavy_loss(&self, world: &mut SimWorld, recorder: &mut Recorder) -> Result<(), RunFailure> {
        world.network_mut().set_all_profiles(LinkProfile::Unreliable {
            min_delay: 0.5,
            max_delay: 1.5,
            drop_rate: 0.4,
        })?;
        recorder.event(world, "all links at 40% loss".to_string());

        for id in world.replica_ids() {
            self.submit_all(world, id)?;
        }
        Ok(())
    }
}

impl From<seqcast_env::EnvError> for RunFailure {
    fn from(e: seqcast_env::EnvError) -> Self {
        RunFailure::Sim(SimError::Env(e))
    }
}

fn collect_metrics(world: &SimWorld) -> ScenarioMetrics {
    let net = world.network().stats();
    let mut metrics = ScenarioMetrics {
        messages_forwarded: net.messages_forwarded,
        messages_dropped: net.messages_dropped,
        messages_severed: net.messages_severed,
        ..Default::default()
    };

    for replica in world.replicas() {
        metrics.submit_resends += replica.submitter().resends();
        metrics.duplicates_absorbed += replica.stats().duplicates_absorbed;
        metrics.protocol_errors += replica.stats().protocol_errors;
        if let Some(sequencer) = replica.sequencer() {
            metrics.propagate_retries += sequencer.retransmissions();
        }
    }
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_scenario_passes_on_moderate_links() {
        let runner = ScenarioRunner::new(42, 3).with_profile(NetworkProfile::Moderate);
        for scenario in ScenarioId::all() {
            let result = runner.run(scenario);
            assert!(
                result.passed,
                "{} failed: {:?}",
                scenario,
                result.failure_reason
            );
            assert_eq!(result.entries, 6);
        }
    }

    #[test]
    fn test_adverse_baseline_two_replicas() {
        let result = ScenarioRunner::new(7, 2).run(ScenarioId::Baseline);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.entries, 4);
        assert!(result.metrics.settled_at.is_some());
    }

    #[test]
    fn test_partition_needs_two_replicas() {
        let result = ScenarioRunner::new(1, 1).run(ScenarioId::PartitionHeal);
        assert!(!result.passed);
        assert!(result.failure_reason.unwrap().contains("at least 2"));
    }

    #[test]
    fn test_partition_counts_severed_messages() {
        let result = ScenarioRunner::new(3, 2)
            .with_profile(NetworkProfile::Reliable)
            .run(ScenarioId::PartitionHeal);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.metrics.messages_severed > 0);
    }

    #[test]
    fn test_unsettled_run_fails() {
        let result = ScenarioRunner::new(5, 2)
            .with_duration(0.05)
            .run(ScenarioId::HeavyLoss);
        assert!(!result.passed);
        assert!(result.failure_reason.unwrap().contains("did not settle"));
    }

    #[test]
    fn test_export_has_events() {
        let (result, export) = ScenarioRunner::new(9, 2)
            .with_profile(NetworkProfile::Reliable)
            .run_exported(ScenarioId::FollowerCrash, 50);
        assert!(result.passed);
        assert!(export.passed);
        assert!(!export.frames.is_empty());
        assert!(export
            .frames
            .iter()
            .any(|f| f.events.iter().any(|e| e.message.contains("recovered"))));
    }
}
