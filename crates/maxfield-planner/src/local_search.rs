//! Default route solver: seeded local search over agent assignments.
//!
//! Starts from a round-robin assignment and applies random moves (hand one
//! link to another agent, or swap the agents of two consecutive links),
//! keeping any move that does not raise the cost. The search stops when the
//! budget runs out or when `patience` candidates in a row bring no strict
//! improvement. Routes always follow the global sequence order, so
//! precedence holds for every candidate.

use std::time::Instant;

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use field_kernel::{PlanError, RouteSolution, RouteSolver, RoutingModel, SolverBudget};

/// Candidates without improvement after which the search has converged.
pub const DEFAULT_PATIENCE: usize = 500;

#[derive(Debug, Clone)]
pub struct LocalSearchSolver {
    seed: u64,
    patience: usize,
}

impl LocalSearchSolver {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            patience: DEFAULT_PATIENCE,
        }
    }

    pub fn with_patience(mut self, patience: usize) -> Self {
        self.patience = patience.max(1);
        self
    }
}

/// Visit `i` goes to agent `i % agents`.
pub fn round_robin(visits: usize, agents: usize) -> Vec<usize> {
    (0..visits).map(|v| v % agents.max(1)).collect()
}

/// Group visits by owning agent, keeping sequence order.
pub fn routes_from_owners(owner: &[usize], agents: usize) -> Vec<Vec<usize>> {
    let mut routes = vec![Vec::new(); agents];
    for (visit, &agent) in owner.iter().enumerate() {
        routes[agent].push(visit);
    }
    routes
}

impl RouteSolver for LocalSearchSolver {
    fn name(&self) -> &str {
        "local-search"
    }

    fn solve(
        &self,
        model: &RoutingModel,
        budget: &SolverBudget,
    ) -> Result<RouteSolution, PlanError> {
        let started = Instant::now();
        if budget.exhausted(0) {
            return Err(PlanError::SolverTimeout {
                evaluated: 0,
                elapsed_ms: started.elapsed().as_millis() as u64,
            });
        }

        let n = model.len();
        let agents = model.agents.max(1);
        let mut owner = round_robin(n, agents);
        let mut load = vec![0usize; agents];
        for &a in &owner {
            load[a] += 1;
        }
        let mut best = model.simulate(&routes_from_owners(&owner, agents))?.cost;
        let mut evaluated = 1;

        if agents == 1 || n < 2 {
            return Ok(RouteSolution {
                routes: routes_from_owners(&owner, agents),
                evaluated,
            });
        }

        // Agents may only go idle when there are more agents than links.
        let min_load = usize::from(agents <= n);
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut stale = 0;

        while stale < self.patience && !budget.exhausted(evaluated) {
            let undo: Vec<(usize, usize)> = if rng.random_bool(0.5) {
                let visit = rng.random_range(0..n);
                let from = owner[visit];
                let to = (from + rng.random_range(1..agents)) % agents;
                if load[from] <= min_load {
                    continue;
                }
                owner[visit] = to;
                load[from] -= 1;
                load[to] += 1;
                vec![(visit, from)]
            } else {
                let visit = rng.random_range(0..n - 1);
                let (a, b) = (owner[visit], owner[visit + 1]);
                if a == b {
                    continue;
                }
                owner.swap(visit, visit + 1);
                vec![(visit, a), (visit + 1, b)]
            };

            let cost = model.simulate(&routes_from_owners(&owner, agents))?.cost;
            evaluated += 1;
            stale = if cost < best { 0 } else { stale + 1 };
            if cost <= best {
                best = cost;
            } else {
                for (visit, agent) in undo {
                    load[owner[visit]] -= 1;
                    load[agent] += 1;
                    owner[visit] = agent;
                }
            }
        }

        Ok(RouteSolution {
            routes: routes_from_owners(&owner, agents),
            evaluated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use field_kernel::{RouteObjective, Visit};

    /// Two clusters of visits 1km apart, alternating in sequence order.
    fn clustered(agents: usize) -> RoutingModel {
        let n = 8;
        let side = |v: usize| v % 2;
        let visits = (0..n)
            .map(|i| Visit {
                link: i,
                origin: i,
                destination: i,
            })
            .collect();
        let travel = (0..n)
            .map(|i| {
                (0..n)
                    .map(|j| if side(i) == side(j) { 10 } else { 1000 })
                    .collect()
            })
            .collect();
        RoutingModel {
            visits,
            travel,
            predecessors: vec![Vec::new(); n],
            agents,
            objective: RouteObjective::MaxDistance,
            walk_speed_mps: 1.0,
            link_secs: 30,
            comm_secs: 30,
        }
    }

    #[test]
    fn test_zero_budget_times_out() {
        let model = clustered(2);
        let budget = SolverBudget::new(100, Duration::ZERO);
        let err = LocalSearchSolver::new(1).solve(&model, &budget).unwrap_err();
        assert!(matches!(err, PlanError::SolverTimeout { evaluated: 0, .. }));
    }

    #[test]
    fn test_search_never_worse_than_round_robin() {
        let model = clustered(2);
        let start = model
            .simulate(&routes_from_owners(&round_robin(8, 2), 2))
            .unwrap()
            .cost;
        let budget = SolverBudget::new(500, Duration::from_secs(30));
        let solution = LocalSearchSolver::new(7).solve(&model, &budget).unwrap();
        let cost = model.simulate(&solution.routes).unwrap().cost;
        assert!(cost <= start);
        assert!(solution.evaluated <= 500);
        assert!(solution.routes.iter().all(|r| !r.is_empty()));
    }

    #[test]
    fn test_round_robin_already_splits_clusters() {
        // Alternating sides means round robin puts each side on one agent
        let model = clustered(2);
        let routes = routes_from_owners(&round_robin(8, 2), 2);
        assert_eq!(model.route_distances(&routes), vec![30, 30]);
    }

    #[test]
    fn test_search_stops_once_converged() {
        // Round robin is already optimal here, so nothing ever improves
        let model = clustered(2);
        let budget = SolverBudget::new(10_000, Duration::from_secs(30));
        let solution = LocalSearchSolver::new(5)
            .with_patience(50)
            .solve(&model, &budget)
            .unwrap();
        assert_eq!(solution.evaluated, 51);
        assert!(!budget.exhausted(solution.evaluated));
        assert_eq!(model.route_distances(&solution.routes), vec![30, 30]);
    }

    #[test]
    fn test_same_seed_same_routes() {
        let model = clustered(3);
        let budget = || SolverBudget::new(200, Duration::from_secs(30));
        let a = LocalSearchSolver::new(3).solve(&model, &budget()).unwrap();
        let b = LocalSearchSolver::new(3).solve(&model, &budget()).unwrap();
        assert_eq!(a, b);
    }
}
