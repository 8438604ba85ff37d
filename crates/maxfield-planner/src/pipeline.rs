//! End-to-end planning: select a sequenced plan, then route the agents.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::info;

use field_kernel::{PlannerConfig, Portal, PortalSet, RouteSolver};

use crate::local_search::LocalSearchSolver;
use crate::plan::Plan;
use crate::router::{RouteAssignment, RouteOptimizer};
use crate::selector::{PlanSelector, TrialStats};
use crate::sequencer::Sequence;

/// Everything one planning run produced.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub seed: u64,
    pub portals: Arc<PortalSet>,
    pub plan: Plan,
    pub sequence: Sequence,
    pub routes: RouteAssignment,
    pub trials: TrialStats,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Runs the planning stages in order: selector (which sequences every
/// trial), then router.
pub struct Planner {
    config: PlannerConfig,
    solver: Option<Arc<dyn RouteSolver>>,
}

impl Planner {
    pub fn new(config: PlannerConfig) -> Self {
        Self {
            config,
            solver: None,
        }
    }

    /// Route with `solver` instead of the default local search.
    pub fn with_solver(mut self, solver: Arc<dyn RouteSolver>) -> Self {
        self.solver = Some(solver);
        self
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Plan an operation over `portals`.
    ///
    /// Domain failures are returned as [`field_kernel::PlanError`] inside the
    /// error chain, so callers can downcast to tell the stages apart.
    pub async fn run(&self, portals: Vec<Portal>) -> Result<PlanOutcome> {
        let started_at = Utc::now();
        self.config.validate()?;
        let portals = Arc::new(PortalSet::new(portals)?);
        let seed = self.config.seed.unwrap_or_else(rand::random);
        info!(
            seed,
            portals = portals.len(),
            agents = self.config.agents,
            trials = self.config.trials,
            "Planning run started"
        );

        let selection = PlanSelector::new(Arc::clone(&portals), self.config.clone())
            .select(seed)
            .await?;

        let solver = self
            .solver
            .clone()
            .unwrap_or_else(|| Arc::new(LocalSearchSolver::new(seed)));
        let optimizer = RouteOptimizer::new(self.config.agents, self.config.routing, solver);
        let routes = {
            let portals = Arc::clone(&portals);
            let plan = selection.plan.clone();
            let sequence = selection.sequence.clone();
            tokio::task::spawn_blocking(move || optimizer.optimize(&portals, &plan, &sequence))
                .await
                .context("route optimization task failed")??
        };

        let finished_at = Utc::now();
        info!(
            plan = %selection.plan.id,
            ap = selection.plan.total_ap(),
            links = selection.plan.links.len(),
            fields = selection.plan.fields.len(),
            quality = ?routes.quality,
            makespan_secs = routes.makespan_secs,
            "Planning run complete"
        );

        Ok(PlanOutcome {
            seed,
            portals,
            plan: selection.plan,
            sequence: selection.sequence,
            routes,
            trials: selection.stats,
            started_at,
            finished_at,
        })
    }
}
