//! Replication properties checked across many seeds.

use proptest::prelude::*;
use seqcast_env::ReplicaId;
use seqcast_sim::scenarios::ScenarioId;
use seqcast_sim::{LinkProfile, NetworkProfile, ScenarioRunner, SimConfig, SimWorld};

fn submit_round_robin(world: &mut SimWorld, replicas: usize, per_replica: usize) {
    for k in 1..=per_replica {
        for i in 0..replicas {
            world
                .submit(ReplicaId(i), &format!("r{}-{}", i, k))
                .unwrap();
        }
    }
}

#[test]
fn two_replicas_adverse_two_values_each() {
    let mut world = SimWorld::new(
        SimConfig::default()
            .with_seed(2024)
            .with_replicas(2)
            .with_profile(NetworkProfile::Adverse),
    )
    .unwrap();
    submit_round_robin(&mut world, 2, 2);

    assert!(world.run_until(300.0, |w| w.is_quiescent()));

    let snaps = world.snapshots();
    assert_eq!(snaps[0].len, 4);
    assert_eq!(snaps[1].len, 4);
    assert_eq!(snaps[0].values(), snaps[1].values());
    assert_eq!(snaps[0].hash, snaps[1].hash);
    world.oracle.check_convergence(&snaps).unwrap();
}

#[test]
fn acked_broadcasts_stop_retransmitting() {
    let mut world = SimWorld::new(SimConfig::default().with_replicas(3)).unwrap();
    submit_round_robin(&mut world, 3, 1);
    world.run_for(2.0);

    let coordinator = world.replica(ReplicaId(0)).unwrap();
    let sequencer = coordinator.sequencer().unwrap();
    assert_eq!(sequencer.outstanding_count(), 0);
    assert_eq!(sequencer.retransmissions(), 0);

    let forwarded = world.network().stats().messages_forwarded;
    world.run_for(10.0);
    assert_eq!(world.network().stats().messages_forwarded, forwarded);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn eventual_replication_for_any_loss_below_one(
        seed in any::<u64>(),
        replicas in 1usize..5,
        per_replica in 1usize..4,
        drop_rate in 0.0f64..0.6,
        shuffle in any::<bool>(),
    ) {
        let mut world = SimWorld::new(
            SimConfig::default()
                .with_seed(seed)
                .with_replicas(replicas)
                .with_shuffle(shuffle),
        )
        .unwrap();
        world
            .network_mut()
            .set_all_profiles(LinkProfile::Unreliable {
                min_delay: 0.0,
                max_delay: 1.0,
                drop_rate,
            })
            .unwrap();
        submit_round_robin(&mut world, replicas, per_replica);

        let mut prefix_ok = true;
        let settled = world.run_until(500.0, |w| {
            prefix_ok &= w.oracle.check_prefix_agreement(&w.snapshots()).is_ok();
            w.is_quiescent()
        });

        prop_assert!(prefix_ok);
        prop_assert!(settled);
        let snaps = world.snapshots();
        prop_assert_eq!(snaps[0].len, replicas * per_replica);
        prop_assert!(world.oracle.check_convergence(&snaps).is_ok());
    }

    #[test]
    fn same_seed_replays_identically(seed in any::<u64>()) {
        let run = || {
            let result = ScenarioRunner::new(seed, 3)
                .with_shuffle(true)
                .run(ScenarioId::Baseline);
            (result.passed, result.total_ticks, result.metrics.messages_dropped)
        };
        prop_assert_eq!(run(), run());
    }

    #[test]
    fn crash_scenarios_converge(seed in any::<u64>()) {
        let runner = ScenarioRunner::new(seed, 3).with_profile(NetworkProfile::Moderate);
        for scenario in [ScenarioId::CoordinatorCrash, ScenarioId::FollowerCrash] {
            let result = runner.run(scenario);
            prop_assert!(result.passed, "{}: {:?}", scenario, result.failure_reason);
            prop_assert_eq!(result.entries, 6);
        }
    }
}
