//! Routing model and the solver seam.
//!
//! A [`RouteSolver`] partitions a sequenced list of link visits among agents.
//! Solvers are synchronous and pure: given the same model and budget they
//! must return the same routes. Each route keeps the global sequence order,
//! so any assignment a solver returns respects link precedence.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::{RouteObjective, RoutingConfig};
use crate::error::PlanError;
use crate::portal::{LinkId, PortalId};

/// One link to be made, at its position in the global sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visit {
    pub link: LinkId,
    pub origin: PortalId,
    pub destination: PortalId,
}

/// Everything a solver needs to score an assignment.
#[derive(Debug, Clone)]
pub struct RoutingModel {
    /// Visits in global sequence order.
    pub visits: Vec<Visit>,
    /// `travel[i][j]`: metres walked after visit `i` to reach visit `j`.
    pub travel: Vec<Vec<u64>>,
    /// Visit indices that must finish before each visit starts.
    pub predecessors: Vec<Vec<usize>>,
    pub agents: usize,
    pub objective: RouteObjective,
    pub walk_speed_mps: f64,
    pub link_secs: u64,
    pub comm_secs: u64,
}

/// Search limits handed to a solver.
#[derive(Debug, Clone, Copy)]
pub struct SolverBudget {
    pub max_candidates: usize,
    pub deadline: Instant,
}

impl SolverBudget {
    pub fn new(max_candidates: usize, time_budget: Duration) -> Self {
        Self {
            max_candidates,
            deadline: Instant::now() + time_budget,
        }
    }

    pub fn from_config(config: &RoutingConfig) -> Self {
        Self::new(
            config.max_candidates,
            Duration::from_secs(config.time_budget_secs),
        )
    }

    /// Whether a solver that has scored `evaluated` candidates must stop.
    pub fn exhausted(&self, evaluated: usize) -> bool {
        evaluated >= self.max_candidates || Instant::now() >= self.deadline
    }
}

/// A solver's answer: the visits of each agent, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSolution {
    pub routes: Vec<Vec<usize>>,
    /// Candidate assignments scored while searching.
    pub evaluated: usize,
}

/// Lexicographic cost of an assignment; lower is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RouteCost {
    /// The configured objective in metres.
    pub primary: u64,
    /// The other distance measure, as a tie-breaker.
    pub secondary: u64,
    pub makespan_secs: u64,
}

/// Start and finish time of one visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledVisit {
    pub visit: usize,
    pub agent: usize,
    pub start_secs: u64,
    pub finish_secs: u64,
}

/// Simulated execution of an assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    /// Indexed by visit.
    pub entries: Vec<ScheduledVisit>,
    pub agent_distance: Vec<u64>,
    pub makespan_secs: u64,
    pub cost: RouteCost,
}

/// Assigns sequenced link visits to agents.
///
/// This trait is **synchronous**; callers run it on a blocking thread.
pub trait RouteSolver: Send + Sync {
    /// Name used in logs and reports.
    fn name(&self) -> &str;

    /// Best assignment found within `budget`.
    ///
    /// Returns [`PlanError::SolverTimeout`] when the budget ran out before
    /// any assignment was found.
    fn solve(&self, model: &RoutingModel, budget: &SolverBudget)
    -> Result<RouteSolution, PlanError>;
}

impl RoutingModel {
    pub fn len(&self) -> usize {
        self.visits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visits.is_empty()
    }

    /// Seconds needed to walk `metres`.
    pub fn walk_secs(&self, metres: u64) -> u64 {
        (metres as f64 / self.walk_speed_mps).ceil() as u64
    }

    /// Check that `routes` cover every visit exactly once, each in sequence order.
    pub fn check_routes(&self, routes: &[Vec<usize>]) -> Result<(), PlanError> {
        if routes.len() != self.agents {
            return Err(PlanError::InvalidInput(format!(
                "expected {} routes, got {}",
                self.agents,
                routes.len()
            )));
        }
        let mut seen = vec![false; self.visits.len()];
        for (agent, route) in routes.iter().enumerate() {
            for (pos, &visit) in route.iter().enumerate() {
                if visit >= seen.len() || seen[visit] {
                    return Err(PlanError::InvalidInput(format!(
                        "agent {agent} has an unknown or repeated visit {visit}"
                    )));
                }
                if pos > 0 && route[pos - 1] > visit {
                    return Err(PlanError::InvalidInput(format!(
                        "agent {agent} visits {visit} out of sequence order"
                    )));
                }
                seen[visit] = true;
            }
        }
        if let Some(missing) = seen.iter().position(|s| !s) {
            return Err(PlanError::InvalidInput(format!(
                "visit {missing} is not assigned to any agent"
            )));
        }
        Ok(())
    }

    /// Walked distance of each route.
    pub fn route_distances(&self, routes: &[Vec<usize>]) -> Vec<u64> {
        routes
            .iter()
            .map(|route| route.windows(2).map(|w| self.travel[w[0]][w[1]]).sum())
            .collect()
    }

    /// Simulate the assignment with walking, link and communication delays.
    ///
    /// A visit starts once its agent has arrived and every predecessor has
    /// finished; a predecessor made by another agent also has to be reported.
    pub fn simulate(&self, routes: &[Vec<usize>]) -> Result<Schedule, PlanError> {
        self.check_routes(routes)?;

        let n = self.visits.len();
        let mut owner = vec![0; n];
        let mut previous = vec![None; n];
        for (agent, route) in routes.iter().enumerate() {
            for (pos, &visit) in route.iter().enumerate() {
                owner[visit] = agent;
                previous[visit] = pos.checked_sub(1).map(|p| route[p]);
            }
        }

        // Predecessors always sit earlier in the sequence, so one pass in
        // visit order sees every finish time it needs.
        let mut finish = vec![0u64; n];
        let mut free_at = vec![0u64; self.agents];
        let mut entries = Vec::with_capacity(n);
        for visit in 0..n {
            let agent = owner[visit];
            let arrival = match previous[visit] {
                Some(prev) => free_at[agent] + self.walk_secs(self.travel[prev][visit]),
                None => 0,
            };
            let ready = self.predecessors[visit]
                .iter()
                .map(|&p| {
                    if owner[p] == agent {
                        finish[p]
                    } else {
                        finish[p] + self.comm_secs
                    }
                })
                .max()
                .unwrap_or(0);
            let start = arrival.max(ready);
            finish[visit] = start + self.link_secs;
            free_at[agent] = finish[visit];
            entries.push(ScheduledVisit {
                visit,
                agent,
                start_secs: start,
                finish_secs: finish[visit],
            });
        }

        let agent_distance = self.route_distances(routes);
        let makespan_secs = finish.iter().copied().max().unwrap_or(0);
        let cost = self.cost_of(&agent_distance, makespan_secs);
        Ok(Schedule {
            entries,
            agent_distance,
            makespan_secs,
            cost,
        })
    }

    fn cost_of(&self, agent_distance: &[u64], makespan_secs: u64) -> RouteCost {
        let max = agent_distance.iter().copied().max().unwrap_or(0);
        let total = agent_distance.iter().sum();
        let (primary, secondary) = match self.objective {
            RouteObjective::MaxDistance => (max, total),
            RouteObjective::TotalDistance => (total, max),
        };
        RouteCost {
            primary,
            secondary,
            makespan_secs,
        }
    }
}
