//! SeqCast Simulator CLI
//!
//! Run deterministic replication scenarios over simulated lossy links.

use clap::Parser;
use seqcast_env::{ReplicaId, TokioContext};
use seqcast_sim::scenarios::ScenarioId;
use seqcast_sim::{NetworkProfile, ScenarioResult, ScenarioRunner, SimConfig, SimWorld};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// SeqCast deterministic simulation CLI
#[derive(Parser, Debug)]
#[command(name = "seqcast-sim")]
#[command(about = "Run deterministic replication scenarios for SeqCast", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Number of replicas (replica 0 coordinates)
    #[arg(short, long, default_value = "2")]
    replicas: usize,

    /// Scenario to run (baseline, partition_heal, coordinator_crash, follower_crash, heavy_loss, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Values submitted per replica
    #[arg(short, long, default_value = "2")]
    entries: usize,

    /// Network preset (reliable, moderate, adverse)
    #[arg(short, long, default_value = "adverse")]
    profile: NetworkProfile,

    /// Maximum time allowed to settle, in logical units
    #[arg(short, long, default_value = "200")]
    duration: f64,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Update replicas in a seeded random order
    #[arg(long)]
    shuffle: bool,

    /// Pace ticks on the wall clock and run the baseline workload once
    #[arg(long)]
    realtime: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export replica snapshots to a JSON file
    #[arg(long)]
    export: Option<String>,
}

/// Runs the baseline workload with wall-clock pacing between ticks.
fn run_realtime(args: &Args, seed: u64) -> bool {
    let config = SimConfig::default()
        .with_seed(seed)
        .with_replicas(args.replicas)
        .with_profile(args.profile)
        .with_shuffle(args.shuffle);

    let mut world = match SimWorld::new(config) {
        Ok(world) => world,
        Err(e) => {
            error!("Failed to create world: {}", e);
            return false;
        }
    };

    for id in ReplicaId::range(args.replicas) {
        for k in 1..=args.entries {
            if let Err(e) = world.submit(id, &format!("{}-v{}", id, k)) {
                error!("Submit failed: {}", e);
                return false;
            }
        }
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_time().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            return false;
        }
    };

    let pacer = TokioContext::new();
    let ticks = world.ticks_for(args.duration);
    let batch = world.ticks_for(1.0).max(1);
    runtime.block_on(async {
        let mut done = 0;
        while done < ticks && !world.is_quiescent() {
            let step = batch.min(ticks - done);
            world.run_paced(&pacer, step).await;
            done += step;
            info!("t={:.1} | in flight={}", world.time(), world.network().in_flight());
        }
    });

    let snapshots = world.snapshots();
    for snapshot in &snapshots {
        info!("{} | {} entries | {} | {:?}", snapshot.replica, snapshot.len, snapshot.hash, snapshot.values());
    }

    match world.oracle.check_convergence(&snapshots) {
        Ok(()) => {
            info!("✓ realtime run (seed={}) converged at t={:.2}", seed, world.time());
            true
        }
        Err(e) => {
            error!("✗ realtime run (seed={}) FAILED: {}", seed, e);
            false
        }
    }
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if !args.json {
        info!("SeqCast Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        match args.scenario.parse() {
            Ok(scenario) => vec![scenario],
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!(
                    "Available scenarios: baseline, partition_heal, coordinator_crash, follower_crash, heavy_loss, all"
                );
                std::process::exit(1);
            }
        }
    };

    // Determine base seed
    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default()
    } else {
        args.seed
    };

    if args.realtime {
        if !run_realtime(&args, base_seed) {
            std::process::exit(1);
        }
        return;
    }

    let runner_for = |seed: u64| {
        ScenarioRunner::new(seed, args.replicas)
            .with_entries(args.entries)
            .with_profile(args.profile)
            .with_duration(args.duration)
            .with_shuffle(args.shuffle)
    };

    // Handle --export mode
    if let Some(export_path) = &args.export {
        if scenarios.len() > 1 {
            eprintln!("Error: --export only supports a single scenario, not 'all'");
            std::process::exit(1);
        }

        info!("Running with export to: {}", export_path);
        let (result, export) = runner_for(base_seed).run_exported(scenarios[0], 10);

        if let Err(e) = export.write_to_file(export_path) {
            error!("Failed to write export: {:?}", e);
            std::process::exit(1);
        }
        info!("Exported {} frames to {}", export.frames.len(), export_path);

        if result.passed {
            info!("✓ {} (seed={}) PASSED", scenarios[0].name(), base_seed);
        } else {
            error!(
                "✗ {} FAILED: {}",
                scenarios[0].name(),
                result.failure_reason.as_deref().unwrap_or("unknown")
            );
            std::process::exit(1);
        }
        return;
    }

    // Track results
    let mut all_results: Vec<ScenarioResult> = Vec::new();
    let mut failed_count = 0;

    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = runner_for(seed);

        for scenario in &scenarios {
            let result = runner.run(*scenario);

            if !args.json {
                if result.passed {
                    info!(
                        "✓ {} (seed={}) PASSED | {} entries | settled at t={:.2}",
                        scenario.name(),
                        seed,
                        result.entries,
                        result.metrics.settled_at.unwrap_or(result.final_time_secs)
                    );
                } else {
                    error!(
                        "✗ {} (seed={}) FAILED: {}",
                        scenario.name(),
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }

            if !result.passed {
                failed_count += 1;
            }

            all_results.push(result);
        }
    }

    // Summary
    let total = all_results.len();
    let passed = total - failed_count;

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "profile": args.profile.name(),
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "ticks": r.total_ticks,
                    "time_secs": r.final_time_secs,
                    "entries": r.entries,
                    "failure_reason": r.failure_reason,
                    "metrics": r.metrics,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => error!("Failed to encode summary: {}", e),
        }
    } else {
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);

            for result in &all_results {
                if !result.passed {
                    error!(
                        "  - {} seed={}: {}",
                        result.scenario.name(),
                        result.seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}
