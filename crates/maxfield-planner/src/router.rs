//! Multi-agent route optimization.
//!
//! Turns a sequenced plan into a [`RoutingModel`], hands it to the injected
//! [`RouteSolver`] and decodes the answer into per-agent routes on a shared
//! clock. When the solver runs out of budget without an answer, a greedy
//! nearest-agent assignment is used instead and the result is flagged as
//! degraded.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use field_kernel::{
    Link, LinkId, PlanError, PortalId, PortalSet, RouteCost, RouteSolver, RoutingConfig,
    RoutingModel, SolverBudget, TravelAnchor, Visit,
};

use crate::local_search::LocalSearchSolver;
use crate::plan::Plan;
use crate::sequencer::Sequence;

/// How a route assignment was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteQuality {
    /// One agent: the route is the link sequence.
    Trivial,
    /// The solver converged before the budget ran out.
    Optimized,
    /// The solver returned its best assignment when the budget ran out.
    BudgetExhausted,
    /// The solver found nothing; the greedy fallback was used.
    Degraded,
}

/// One link on the shared timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub agent: usize,
    pub link: LinkId,
    pub origin: PortalId,
    pub destination: PortalId,
    /// Position of the link in the global sequence.
    pub position: usize,
    pub start_secs: u64,
    pub finish_secs: u64,
    /// Metres walked by this agent to reach the link's origin.
    pub walked_m: u64,
    /// Metres walked by this agent so far.
    pub cumulative_m: u64,
    pub early_eligible: bool,
}

/// Links of one agent, in the order they are made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRoute {
    pub agent: usize,
    pub links: Vec<LinkId>,
    pub distance_m: u64,
    pub finish_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteAssignment {
    pub solver: String,
    pub quality: RouteQuality,
    pub routes: Vec<AgentRoute>,
    /// Every link ordered by start time, then sequence position.
    pub timeline: Vec<Assignment>,
    pub makespan_secs: u64,
    pub cost: RouteCost,
    /// Candidate assignments the solver scored.
    pub evaluated: usize,
}

impl RouteAssignment {
    pub fn total_distance(&self) -> u64 {
        self.routes.iter().map(|r| r.distance_m).sum()
    }

    pub fn max_distance(&self) -> u64 {
        self.routes.iter().map(|r| r.distance_m).max().unwrap_or(0)
    }
}

/// Assigns a plan's sequenced links to agents.
pub struct RouteOptimizer {
    agents: usize,
    config: RoutingConfig,
    solver: Arc<dyn RouteSolver>,
}

impl RouteOptimizer {
    pub fn new(agents: usize, config: RoutingConfig, solver: Arc<dyn RouteSolver>) -> Self {
        Self {
            agents,
            config,
            solver,
        }
    }

    /// An optimizer backed by [`LocalSearchSolver`].
    pub fn with_local_search(agents: usize, config: RoutingConfig, seed: u64) -> Self {
        Self::new(agents, config, Arc::new(LocalSearchSolver::new(seed)))
    }

    /// Build the solver's view of the sequenced plan.
    pub fn build_model(&self, portals: &PortalSet, plan: &Plan, sequence: &Sequence) -> RoutingModel {
        let visits: Vec<Visit> = sequence
            .order
            .iter()
            .map(|&id| {
                let link: &Link = &plan.links[id];
                Visit {
                    link: id,
                    origin: link.origin,
                    destination: link.destination,
                }
            })
            .collect();
        let anchor = |v: &Visit| match self.config.travel_anchor {
            TravelAnchor::Destination => v.destination,
            TravelAnchor::Origin => v.origin,
        };
        let travel = visits
            .iter()
            .map(|from| {
                visits
                    .iter()
                    .map(|to| portals.distance(anchor(from), to.origin))
                    .collect()
            })
            .collect();
        let predecessors = sequence
            .order
            .iter()
            .map(|&id| {
                let mut preds: Vec<usize> = sequence
                    .precedence
                    .predecessors(id)
                    .iter()
                    .map(|&p| sequence.position[p])
                    .collect();
                preds.sort_unstable();
                preds
            })
            .collect();

        RoutingModel {
            visits,
            travel,
            predecessors,
            agents: self.agents,
            objective: self.config.objective,
            walk_speed_mps: self.config.walk_speed_mps,
            link_secs: self.config.link_secs,
            comm_secs: self.config.comm_secs,
        }
    }

    /// Assign every sequenced link to an agent.
    ///
    /// This call blocks for up to the configured solver budget.
    pub fn optimize(
        &self,
        portals: &PortalSet,
        plan: &Plan,
        sequence: &Sequence,
    ) -> Result<RouteAssignment, PlanError> {
        if sequence.is_empty() {
            return Err(PlanError::Infeasible {
                reason: "plan has no links to route".to_string(),
                portals: portals.len(),
                trials: 0,
            });
        }
        let model = self.build_model(portals, plan, sequence);

        if self.agents == 1 {
            let routes = vec![(0..model.len()).collect()];
            return self.decode(&model, sequence, routes, RouteQuality::Trivial, "sequence", 0);
        }

        let started = Instant::now();
        let budget = SolverBudget::from_config(&self.config);
        match self.solver.solve(&model, &budget) {
            Ok(solution) => match model.check_routes(&solution.routes) {
                Ok(()) => {
                    let quality = if budget.exhausted(solution.evaluated) {
                        RouteQuality::BudgetExhausted
                    } else {
                        RouteQuality::Optimized
                    };
                    info!(
                        solver = self.solver.name(),
                        evaluated = solution.evaluated,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        ?quality,
                        "Route solver finished"
                    );
                    self.decode(
                        &model,
                        sequence,
                        solution.routes,
                        quality,
                        self.solver.name(),
                        solution.evaluated,
                    )
                }
                Err(err) => {
                    warn!(solver = self.solver.name(), error = %err, "Solver returned invalid routes, using greedy fallback");
                    self.fallback(&model, sequence, solution.evaluated)
                }
            },
            Err(err) if err.is_recoverable() => {
                warn!(solver = self.solver.name(), error = %err, "Route solver gave up, using greedy fallback");
                let evaluated = match err {
                    PlanError::SolverTimeout { evaluated, .. } => evaluated,
                    _ => 0,
                };
                self.fallback(&model, sequence, evaluated)
            }
            Err(err) => Err(err),
        }
    }

    fn fallback(
        &self,
        model: &RoutingModel,
        sequence: &Sequence,
        evaluated: usize,
    ) -> Result<RouteAssignment, PlanError> {
        let routes = greedy_routes(model);
        self.decode(model, sequence, routes, RouteQuality::Degraded, "greedy", evaluated)
    }

    fn decode(
        &self,
        model: &RoutingModel,
        sequence: &Sequence,
        routes: Vec<Vec<usize>>,
        quality: RouteQuality,
        solver: &str,
        evaluated: usize,
    ) -> Result<RouteAssignment, PlanError> {
        let schedule = model.simulate(&routes)?;

        let mut timeline = Vec::with_capacity(model.len());
        let mut agent_routes = Vec::with_capacity(routes.len());
        for (agent, route) in routes.iter().enumerate() {
            let mut cumulative = 0;
            let mut previous: Option<usize> = None;
            for &visit in route {
                let walked = previous.map_or(0, |p| model.travel[p][visit]);
                cumulative += walked;
                let entry = &schedule.entries[visit];
                let v = &model.visits[visit];
                timeline.push(Assignment {
                    agent,
                    link: v.link,
                    origin: v.origin,
                    destination: v.destination,
                    position: visit,
                    start_secs: entry.start_secs,
                    finish_secs: entry.finish_secs,
                    walked_m: walked,
                    cumulative_m: cumulative,
                    early_eligible: sequence.early_eligible[visit],
                });
                previous = Some(visit);
            }
            agent_routes.push(AgentRoute {
                agent,
                links: route.iter().map(|&v| model.visits[v].link).collect(),
                distance_m: schedule.agent_distance[agent],
                finish_secs: route
                    .last()
                    .map_or(0, |&v| schedule.entries[v].finish_secs),
            });
        }
        timeline.sort_by_key(|a| (a.start_secs, a.position));

        debug!(
            agents = agent_routes.len(),
            makespan_secs = schedule.makespan_secs,
            max_distance = schedule.agent_distance.iter().max().copied().unwrap_or(0),
            "Decoded route assignment"
        );
        Ok(RouteAssignment {
            solver: solver.to_string(),
            quality,
            routes: agent_routes,
            timeline,
            makespan_secs: schedule.makespan_secs,
            cost: schedule.cost,
            evaluated,
        })
    }
}

/// Deterministic fallback: walk the sequence and give each link to an idle
/// agent if one is left, otherwise to the agent standing nearest to it.
pub fn greedy_routes(model: &RoutingModel) -> Vec<Vec<usize>> {
    let agents = model.agents.max(1);
    let mut routes: Vec<Vec<usize>> = vec![Vec::new(); agents];
    for visit in 0..model.len() {
        let agent = (0..agents)
            .min_by_key(|&a| match routes[a].last() {
                None => (0, false, a),
                Some(&last) => (model.travel[last][visit], true, a),
            })
            .unwrap_or(0);
        routes[agent].push(visit);
    }
    routes
}
