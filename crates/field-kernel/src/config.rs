//! Configuration types for the planner.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::PlanError;

/// Top-level planner configuration.
///
/// Every field has a default, so a config file only needs the values it
/// overrides. Loaded from TOML or JSON at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Number of agents executing the plan
    pub agents: usize,

    /// Number of independent generator trials
    pub trials: usize,

    /// Worker threads for trials (0 = all available)
    pub parallelism: usize,

    /// Run seed; a random one is drawn and logged when absent
    pub seed: Option<u64>,

    /// Wall-clock cap on plan selection (milliseconds)
    pub trial_budget_ms: Option<u64>,

    /// AP awarded per action
    pub scoring: ScoringConfig,

    /// Outbound link capacities
    pub limits: LinkLimits,

    /// Plan generator tuning
    pub generator: GeneratorConfig,

    /// Link sequencer tuning
    pub sequencer: SequencerConfig,

    /// Multi-agent routing
    pub routing: RoutingConfig,
}

/// AP awarded for each scoring action.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Capture plus full resonator deployment
    pub ap_per_portal: u64,
    pub ap_per_link: u64,
    pub ap_per_field: u64,
}

/// Outbound link capacity per portal kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkLimits {
    pub normal_out_links: usize,
    pub boosted_out_links: usize,
}

/// Plan generator retry budgets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Randomized rebuilds of one first-generation field before it is abandoned
    pub attempts_per_ear: usize,

    /// Candidate pivots tried per sub-triangle
    pub pivot_retries: usize,

    /// Pivot rollbacks allowed within one attempt
    pub rollback_budget: usize,

    /// Ear builds one backtracking search over hull orderings may spend
    /// before an ear is abandoned
    pub ear_search_budget: usize,
}

/// Link sequencer tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    /// Block-move refinement passes after the greedy linearization
    pub reorder_passes: usize,
}

/// What the route optimizer minimizes across agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RouteObjective {
    /// The longest single agent walk
    #[default]
    MaxDistance,
    /// The sum of all agent walks
    TotalDistance,
}

/// Which end of the previous link an agent walks from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TravelAnchor {
    /// From the previous link's destination to the next link's origin
    #[default]
    Destination,
    /// From the previous link's origin (where the agent stood) to the next origin
    Origin,
}

/// Multi-agent routing configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Candidate assignments the solver may evaluate
    pub max_candidates: usize,

    /// Wall-clock solver budget (seconds)
    pub time_budget_secs: u64,

    pub objective: RouteObjective,

    pub travel_anchor: TravelAnchor,

    /// Walking speed (metres per second)
    pub walk_speed_mps: f64,

    /// Seconds to create one link
    pub link_secs: u64,

    /// Seconds to report a finished link to the other agents
    pub comm_secs: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            agents: 1,
            trials: 100,
            parallelism: 0,
            seed: None,
            trial_budget_ms: None,
            scoring: ScoringConfig::default(),
            limits: LinkLimits::default(),
            generator: GeneratorConfig::default(),
            sequencer: SequencerConfig::default(),
            routing: RoutingConfig::default(),
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            ap_per_portal: 1750,
            ap_per_link: 313,
            ap_per_field: 1250,
        }
    }
}

impl Default for LinkLimits {
    fn default() -> Self {
        Self {
            normal_out_links: 8,
            boosted_out_links: 40,
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            attempts_per_ear: 100,
            pivot_retries: 3,
            rollback_budget: 64,
            ear_search_budget: 256,
        }
    }
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self { reorder_passes: 100 }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            max_candidates: 1000,
            time_budget_secs: 60,
            objective: RouteObjective::MaxDistance,
            travel_anchor: TravelAnchor::Destination,
            walk_speed_mps: 1.0,
            link_secs: 30,
            comm_secs: 30,
        }
    }
}

impl PlannerConfig {
    /// Load a configuration file, choosing the format by extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&text)
                .with_context(|| format!("parsing JSON config {}", path.display()))?,
            _ => toml::from_str(&text)
                .with_context(|| format!("parsing TOML config {}", path.display()))?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values no run can work with.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.agents == 0 {
            return Err(PlanError::InvalidInput("agent count must be at least 1".into()));
        }
        if self.trials == 0 {
            return Err(PlanError::InvalidInput("trial count must be at least 1".into()));
        }
        if self.limits.normal_out_links == 0 || self.limits.boosted_out_links == 0 {
            return Err(PlanError::InvalidInput("outbound link limits must be positive".into()));
        }
        if !(self.routing.walk_speed_mps.is_finite() && self.routing.walk_speed_mps > 0.0) {
            return Err(PlanError::InvalidInput("walking speed must be positive".into()));
        }
        Ok(())
    }

    /// Worker count for trials, resolving 0 to the machine's parallelism.
    pub fn effective_parallelism(&self) -> usize {
        let available = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        match self.parallelism {
            0 => available,
            n => n.min(available),
        }
    }
}
