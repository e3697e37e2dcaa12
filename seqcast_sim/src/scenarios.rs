//! Fault scenarios for replication testing.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// Every replica submits, links follow the chosen profile
    Baseline,

    /// Isolate a follower, submit on both sides, heal
    PartitionHeal,

    /// Coordinator down while followers keep submitting
    CoordinatorCrash,

    /// Follower down while broadcasts keep flowing
    FollowerCrash,

    /// 40% loss on every link
    HeavyLoss,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Baseline,
            ScenarioId::PartitionHeal,
            ScenarioId::CoordinatorCrash,
            ScenarioId::FollowerCrash,
            ScenarioId::HeavyLoss,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Baseline => "baseline",
            ScenarioId::PartitionHeal => "partition_heal",
            ScenarioId::CoordinatorCrash => "coordinator_crash",
            ScenarioId::FollowerCrash => "follower_crash",
            ScenarioId::HeavyLoss => "heavy_loss",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Baseline => "Each replica submits its values, verify identical boards",
            ScenarioId::PartitionHeal => {
                "Cut the last replica off, submit on both sides, heal, verify convergence"
            }
            ScenarioId::CoordinatorCrash => {
                "Crash the coordinator mid-run, followers keep retrying, recover"
            }
            ScenarioId::FollowerCrash => {
                "Crash a follower, keep broadcasting, recover and drain its backlog"
            }
            ScenarioId::HeavyLoss => "40% packet loss with 0.5-1.5 delay, verify recovery",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "baseline" => Ok(ScenarioId::Baseline),
            "partition_heal" | "partition" => Ok(ScenarioId::PartitionHeal),
            "coordinator_crash" | "coordinatorcrash" => Ok(ScenarioId::CoordinatorCrash),
            "follower_crash" | "followercrash" => Ok(ScenarioId::FollowerCrash),
            "heavy_loss" | "heavyloss" => Ok(ScenarioId::HeavyLoss),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
        }
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }
}
