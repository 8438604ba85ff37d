//! Plan reports.
//!
//! Flattens a [`PlanOutcome`] into a self-contained, serializable report
//! that names portals instead of indexing them:
//! - Plan summary and AP breakdown
//! - Key preparation and ownership preparation
//! - Per-agent key needs
//! - The merged assignment timeline

use std::fmt;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::PlanOutcome;
use crate::plan::{ApBreakdown, KeyRequirement};
use crate::router::RouteQuality;
use crate::selector::TrialStats;

/// Run metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub plan_id: Uuid,
    pub seed: u64,
    pub trial: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub portals: usize,
    pub agents: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub links: usize,
    pub fields: usize,
    pub ap: ApBreakdown,
    pub total_ap: u64,
    pub max_keys: u32,
    /// Names of portals the plan leaves out
    pub unused: Vec<String>,
    /// Single-agent walk of the link sequence (metres)
    pub walk_length_m: u64,
}

/// Which portals agents must own before the operation starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnershipPrep {
    /// First involved as a link destination; capture can wait
    pub incoming_first: Vec<String>,
    /// First involved as a link origin; must be owned up front
    pub outgoing_first: Vec<String>,
}

/// Keys one agent carries, by portal name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentKeys {
    pub agent: usize,
    pub keys: Vec<(String, u32)>,
}

/// One line of the merged timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub agent: usize,
    /// Position in the global link sequence
    pub position: usize,
    pub origin: String,
    pub destination: String,
    pub start_secs: u64,
    pub finish_secs: u64,
    pub walked_m: u64,
    pub cumulative_m: u64,
    pub early_eligible: bool,
    /// Fields that close when this link lands
    pub fields_completed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub agent: usize,
    pub links: usize,
    pub distance_m: u64,
    pub finish_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingSummary {
    pub solver: String,
    pub quality: RouteQuality,
    pub evaluated: usize,
    pub makespan_secs: u64,
    pub max_distance_m: u64,
    pub total_distance_m: u64,
}

/// Complete report of one planning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanReport {
    pub run: RunInfo,
    pub summary: PlanSummary,
    /// Sorted by portal name
    pub keys: Vec<KeyRequirement>,
    pub ownership: OwnershipPrep,
    pub agent_keys: Vec<AgentKeys>,
    pub timeline: Vec<TimelineEntry>,
    pub agents: Vec<AgentSummary>,
    pub routing: RoutingSummary,
    pub trials: TrialStats,
}

impl PlanReport {
    pub fn from_outcome(outcome: &PlanOutcome) -> Self {
        let portals = &outcome.portals;
        let plan = &outcome.plan;
        let routes = &outcome.routes;
        let name = |id: usize| portals.portal(id).name.clone();

        let mut unused: Vec<String> = plan.unused.iter().map(|&p| name(p)).collect();
        unused.sort();

        // A portal is first involved by the earliest link touching it.
        let mut first_role: Vec<Option<bool>> = vec![None; portals.len()];
        for &link in &outcome.sequence.order {
            let l = &plan.links[link];
            first_role[l.origin].get_or_insert(true);
            first_role[l.destination].get_or_insert(false);
        }
        let mut incoming_first = Vec::new();
        let mut outgoing_first = Vec::new();
        for (portal, role) in first_role.iter().enumerate() {
            match role {
                Some(true) => outgoing_first.push(name(portal)),
                Some(false) => incoming_first.push(name(portal)),
                None => {}
            }
        }
        incoming_first.sort();
        outgoing_first.sort();

        let agent_keys = routes
            .routes
            .iter()
            .map(|route| {
                let mut counts: Vec<(String, u32)> = Vec::new();
                for &link in &route.links {
                    let dest = name(plan.links[link].destination);
                    match counts.iter_mut().find(|(n, _)| *n == dest) {
                        Some((_, count)) => *count += 1,
                        None => counts.push((dest, 1)),
                    }
                }
                counts.sort();
                AgentKeys {
                    agent: route.agent,
                    keys: counts,
                }
            })
            .collect();

        let timeline = routes
            .timeline
            .iter()
            .map(|a| TimelineEntry {
                agent: a.agent,
                position: a.position,
                origin: name(a.origin),
                destination: name(a.destination),
                start_secs: a.start_secs,
                finish_secs: a.finish_secs,
                walked_m: a.walked_m,
                cumulative_m: a.cumulative_m,
                early_eligible: a.early_eligible,
                fields_completed: outcome.sequence.completes[a.position].len(),
            })
            .collect();

        let agents = routes
            .routes
            .iter()
            .map(|r| AgentSummary {
                agent: r.agent,
                links: r.links.len(),
                distance_m: r.distance_m,
                finish_secs: r.finish_secs,
            })
            .collect();

        Self {
            run: RunInfo {
                plan_id: plan.id,
                seed: outcome.seed,
                trial: plan.trial,
                started_at: outcome.started_at,
                finished_at: outcome.finished_at,
                portals: portals.len(),
                agents: routes.routes.len(),
            },
            summary: PlanSummary {
                links: plan.links.len(),
                fields: plan.fields.len(),
                ap: plan.ap,
                total_ap: plan.total_ap(),
                max_keys: plan.max_keys,
                unused,
                walk_length_m: outcome.sequence.walk_length,
            },
            keys: plan.key_requirements(portals),
            ownership: OwnershipPrep {
                incoming_first,
                outgoing_first,
            },
            agent_keys,
            timeline,
            agents,
            routing: RoutingSummary {
                solver: routes.solver.clone(),
                quality: routes.quality,
                evaluated: routes.evaluated,
                makespan_secs: routes.makespan_secs,
                max_distance_m: routes.max_distance(),
                total_distance_m: routes.total_distance(),
            },
            trials: outcome.trials.clone(),
        }
    }

    /// Save the report to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a report from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let report = serde_json::from_str(&json)?;
        Ok(report)
    }
}

impl fmt::Display for PlanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.summary;
        writeln!(f, "Plan {} (seed {}, trial {})", self.run.plan_id, self.run.seed, self.run.trial)?;
        writeln!(
            f,
            "Portals: {} ({} unused)  Links: {}  Fields: {}",
            self.run.portals,
            s.unused.len(),
            s.links,
            s.fields
        )?;
        writeln!(
            f,
            "AP: {} (portals {}, links {}, fields {})",
            s.total_ap, s.ap.portals, s.ap.links, s.ap.fields
        )?;
        writeln!(f, "Max keys at one portal: {}", s.max_keys)?;
        let farm: u32 = self.keys.iter().map(|k| k.remaining).sum();
        writeln!(f, "Keys still to farm: {farm}")?;
        writeln!(
            f,
            "Routing: {} ({:?}), {} candidates, makespan {}",
            self.routing.solver,
            self.routing.quality,
            self.routing.evaluated,
            format_duration(self.routing.makespan_secs)
        )?;
        for agent in &self.agents {
            writeln!(
                f,
                "  Agent {}: {} links, {:.2} km, done at {}",
                agent.agent + 1,
                agent.links,
                agent.distance_m as f64 / 1000.0,
                format_duration(agent.finish_secs)
            )?;
        }
        write!(
            f,
            "Trials: {}/{} completed, best AP {}, mean {:.0}",
            self.trials.completed, self.trials.requested, self.trials.best_ap, self.trials.mean_ap
        )
    }
}

/// Format a duration in seconds for display.
pub fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Planner;
    use crate::scenario::{PortalScenario, PortalScenarioConfig};
    use field_kernel::PlannerConfig;

    async fn outcome() -> PlanOutcome {
        let portals = PortalScenario::new(PortalScenarioConfig::medium(), 17).generate();
        let config = PlannerConfig {
            agents: 2,
            trials: 8,
            seed: Some(17),
            ..Default::default()
        };
        let mut config = config;
        config.routing.max_candidates = 100;
        Planner::new(config).run(portals).await.unwrap()
    }

    #[tokio::test]
    async fn test_report_round_trips_through_json() {
        let report = PlanReport::from_outcome(&outcome().await);
        let file = tempfile::NamedTempFile::new().unwrap();
        report.save(file.path()).unwrap();
        let loaded = PlanReport::load(file.path()).unwrap();
        assert_eq!(loaded, report);
    }

    #[tokio::test]
    async fn test_report_contents() {
        let outcome = outcome().await;
        let report = PlanReport::from_outcome(&outcome);

        assert_eq!(report.timeline.len(), report.summary.links);
        let closed: usize = report.timeline.iter().map(|t| t.fields_completed).sum();
        assert_eq!(closed, report.summary.fields);

        let names: Vec<&str> = report.keys.iter().map(|k| k.name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);

        let carried: u32 = report
            .agent_keys
            .iter()
            .flat_map(|a| a.keys.iter().map(|(_, n)| *n))
            .sum();
        assert_eq!(carried as usize, report.summary.links);

        let owned = report.ownership.incoming_first.len() + report.ownership.outgoing_first.len();
        assert_eq!(owned, report.run.portals - report.summary.unused.len());
        assert!(report.to_string().contains("AP:"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(42), "42s");
        assert_eq!(format_duration(125), "2m05s");
        assert_eq!(format_duration(7260), "2h01m");
    }
}
