//! SeqCast Deterministic Simulation Harness
//!
//! Runs a full replica cluster inside a controlled world where every
//! source of non-determinism is pinned down:
//! - **Time**: virtual clock advanced by a fixed step per tick
//! - **Network**: per-link seeded drop and delay, partitions on demand
//! - **Randomness**: all entropy derived from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SimWorld                            │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ SimContext (virtual clock + ChaCha8 RNG)             │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │       │                        │                            │
//! │  ┌────▼────┐              ┌────▼────┐                       │
//! │  │ Replica │◄────────────►│ Replica │     ...               │
//! │  │   r0    │  SimNetwork  │   r1    │                       │
//! │  └─────────┘   (N×N)      └─────────┘                       │
//! │       ▲                        ▲                            │
//! │  ┌────┴────────────────────────┴────┐                       │
//! │  │             Oracle               │                       │
//! │  │  (submissions + agreement check) │                       │
//! │  └──────────────────────────────────┘                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use seqcast_sim::{NetworkProfile, SimConfig, SimWorld};
//! use seqcast_env::ReplicaId;
//!
//! let config = SimConfig::default().with_profile(NetworkProfile::Adverse);
//! let mut world = SimWorld::new(config).unwrap();
//! world.submit(ReplicaId(1), "hello").unwrap();
//! world.run_for(10.0);
//! println!("{:?}", world.snapshots());
//! ```

mod context;
mod exporter;
mod network;
mod oracle;
mod runner;
mod world;
pub mod scenarios;

pub use context::{SimContext, SimRng};
pub use exporter::{ReplicaFrame, SimEvent, SimExport, SimFrame};
pub use network::{
    LinkProfile, NetworkProfile, NetworkStats, ReliableTransport, SimNetwork, UnreliableTransport,
};
pub use oracle::{Oracle, Submission, Violation};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use world::{SimConfig, SimError, SimWorld};
