//! End-to-end planning runs.
//!
//! Covers the full flow of:
//! - Portal set -> best plan across trials
//! - Plan -> link sequence respecting field precedence
//! - Sequence -> per-agent routes, including the degraded fallback

use std::sync::Arc;

use field_kernel::{
    PlanError, PlannerConfig, Portal, RouteSolution, RouteSolver, RoutingModel, SolverBudget,
};
use maxfield_planner::{Planner, PlanOutcome, PortalScenario, PortalScenarioConfig, RouteQuality};

fn triangle() -> Vec<Portal> {
    vec![
        Portal::new("Fountain", 51.5000, -0.1200),
        Portal::new("Clock Tower", 51.5010, -0.1185),
        Portal::new("Old Mill", 51.4995, -0.1170),
    ]
}

fn medium(seed: u64) -> Vec<Portal> {
    PortalScenario::new(PortalScenarioConfig::medium(), seed).generate()
}

fn config(agents: usize, seed: u64) -> PlannerConfig {
    let mut config = PlannerConfig {
        agents,
        trials: 8,
        seed: Some(seed),
        ..Default::default()
    };
    config.routing.max_candidates = 200;
    config
}

/// Every precedence edge finishes before the dependent link starts.
fn assert_precedence_respected(outcome: &PlanOutcome) {
    let mut start = vec![0; outcome.plan.links.len()];
    let mut finish = vec![0; outcome.plan.links.len()];
    for entry in &outcome.routes.timeline {
        start[entry.link] = entry.start_secs;
        finish[entry.link] = entry.finish_secs;
    }
    for (before, after) in outcome.sequence.precedence.edges() {
        assert!(
            finish[before] <= start[after],
            "link {before} finishes at {} but link {after} starts at {}",
            finish[before],
            start[after]
        );
    }
}

#[tokio::test]
async fn test_three_portals_make_one_field() {
    let outcome = Planner::new(config(1, 1)).run(triangle()).await.unwrap();
    let scoring = &outcome.plan.ap;

    assert_eq!(outcome.plan.links.len(), 3);
    assert_eq!(outcome.plan.fields.len(), 1);
    assert_eq!(scoring.total(), 3 * 1750 + 3 * 313 + 1250);
    assert_eq!(outcome.routes.quality, RouteQuality::Trivial);
    assert_eq!(outcome.routes.routes.len(), 1);
    assert_eq!(outcome.routes.routes[0].links.len(), 3);
}

#[tokio::test]
async fn test_three_agents_share_a_medium_plan() {
    let outcome = Planner::new(config(3, 11)).run(medium(11)).await.unwrap();

    assert_eq!(outcome.routes.routes.len(), 3);
    assert!(outcome.routes.routes.iter().all(|r| !r.links.is_empty()));
    let routed: usize = outcome.routes.routes.iter().map(|r| r.links.len()).sum();
    assert_eq!(routed, outcome.plan.links.len());
    assert_eq!(outcome.routes.timeline.len(), outcome.plan.links.len());
    assert_precedence_respected(&outcome);

    let mut in_degree = vec![0u32; outcome.portals.len()];
    for link in &outcome.plan.links {
        in_degree[link.destination] += 1;
    }
    assert_eq!(outcome.plan.max_keys, in_degree.iter().copied().max().unwrap());
}

#[tokio::test]
async fn test_too_few_portals_is_infeasible() {
    let portals = triangle().into_iter().take(2).collect();
    let err = Planner::new(config(1, 1)).run(portals).await.unwrap_err();
    let plan_err = err.downcast_ref::<PlanError>().unwrap();
    assert!(matches!(plan_err, PlanError::Infeasible { trials: 0, .. }));
}

#[tokio::test]
async fn test_zero_route_budget_degrades_to_greedy() {
    let mut config = config(2, 4);
    config.routing.time_budget_secs = 0;
    let outcome = Planner::new(config).run(medium(4)).await.unwrap();

    assert_eq!(outcome.routes.quality, RouteQuality::Degraded);
    assert_eq!(outcome.routes.solver, "greedy");
    let routed: usize = outcome.routes.routes.iter().map(|r| r.links.len()).sum();
    assert_eq!(routed, outcome.plan.links.len());
    assert_precedence_respected(&outcome);
}

#[tokio::test]
async fn test_fixed_seed_reproduces_the_run() {
    let a = Planner::new(config(2, 23)).run(medium(23)).await.unwrap();
    let b = Planner::new(config(2, 23)).run(medium(23)).await.unwrap();

    assert_eq!(a.plan, b.plan);
    assert_eq!(a.sequence, b.sequence);
    assert_eq!(a.routes, b.routes);
}

/// Hands every link to the last agent.
struct LastAgentSolver;

impl RouteSolver for LastAgentSolver {
    fn name(&self) -> &str {
        "last-agent"
    }

    fn solve(
        &self,
        model: &RoutingModel,
        _budget: &SolverBudget,
    ) -> Result<RouteSolution, PlanError> {
        let mut routes = vec![Vec::new(); model.agents];
        routes[model.agents - 1] = (0..model.len()).collect();
        Ok(RouteSolution {
            routes,
            evaluated: 1,
        })
    }
}

#[tokio::test]
async fn test_injected_solver_is_used() {
    let outcome = Planner::new(config(2, 8))
        .with_solver(Arc::new(LastAgentSolver))
        .run(medium(8))
        .await
        .unwrap();

    assert_eq!(outcome.routes.solver, "last-agent");
    assert_eq!(outcome.routes.quality, RouteQuality::Optimized);
    assert!(outcome.routes.routes[0].links.is_empty());
    assert_eq!(outcome.routes.routes[1].links.len(), outcome.plan.links.len());
    assert_precedence_respected(&outcome);
}
