//! JSON exporter for offline inspection.
//!
//! Exports periodic replica snapshots as JSON frames.

use seqcast_core::ReplicaSnapshot;
use seqcast_env::ReplicaId;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;

/// A single frame of simulation data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    /// Simulation time in logical units
    pub time_sec: f64,

    /// One entry per replica
    pub replicas: Vec<ReplicaFrame>,

    /// Events (partitions, crashes, etc.)
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub events: Vec<SimEvent>,
}

impl SimFrame {
    /// Builds a frame from snapshots taken at `time_sec`.
    pub fn capture(time_sec: f64, snapshots: &[ReplicaSnapshot]) -> Self {
        Self {
            time_sec,
            replicas: snapshots.iter().map(ReplicaFrame::from).collect(),
            events: Vec::new(),
        }
    }
}

/// Replica board state at one instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaFrame {
    pub replica: ReplicaId,
    pub len: usize,
    pub hash: String,
    pub crashed: bool,
    pub values: Vec<String>,
}

impl From<&ReplicaSnapshot> for ReplicaFrame {
    fn from(snapshot: &ReplicaSnapshot) -> Self {
        Self {
            replica: snapshot.replica,
            len: snapshot.len,
            hash: snapshot.hash.clone(),
            crashed: snapshot.crashed,
            values: snapshot.values().into_iter().map(str::to_string).collect(),
        }
    }
}

/// Simulation event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimEvent {
    pub time_sec: f64,
    pub message: String,
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Network preset name
    pub profile: String,

    /// Duration in logical units
    pub duration_sec: f64,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64, profile: &str) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            profile: profile.to_string(),
            duration_sec: 0.0,
            frames: Vec::new(),
            passed: false,
            failure_reason: None,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seqcast_core::Entry;

    #[test]
    fn test_frame_serializes_values() {
        let snapshot = ReplicaSnapshot {
            replica: ReplicaId(1),
            entries: vec![Entry::new(1, "a")],
            len: 1,
            hash: "abc".to_string(),
            crashed: false,
            notes: String::new(),
        };
        let mut export = SimExport::new("baseline", 42, "adverse");
        export.add_frame(SimFrame::capture(2.5, &[snapshot]));
        export.finalize(true, None);

        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json["duration_sec"], 2.5);
        assert_eq!(json["frames"][0]["replicas"][0]["replica"], 1);
        assert_eq!(json["frames"][0]["replicas"][0]["values"][0], "a");
        assert!(json["frames"][0].get("events").is_none());
        assert!(json.get("failure_reason").is_none());
    }
}
