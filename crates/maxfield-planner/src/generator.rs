//! Plan generator.
//!
//! Fields the convex hull one ear at a time: a hull vertex and its two
//! neighbours form a first-generation field, its interior is subdivided
//! recursively, and the vertex is dropped from the polygon. Ear orderings
//! are searched with backtracking; an ear is only abandoned when no
//! ordering of the remaining polygon can be fielded. Each trial owns its
//! RNG, so trials are reproducible and can run on any thread.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace};

use field_kernel::{
    GeneratorConfig, LinkGraph, LinkLimits, PlanError, PlannerConfig, PortalId, PortalSet,
    ScoringConfig,
};

use crate::field::{BuildContext, DeadEnd, FieldNode};
use crate::plan::Plan;

/// RNG of one trial: the run seed selects the generator, the trial its stream.
pub fn trial_rng(seed: u64, trial: u64) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(trial);
    rng
}

/// Builds randomized plans over one portal set.
pub struct PlanGenerator<'a> {
    portals: &'a PortalSet,
    generator: GeneratorConfig,
    limits: LinkLimits,
    scoring: ScoringConfig,
}

impl<'a> PlanGenerator<'a> {
    pub fn new(portals: &'a PortalSet, config: &PlannerConfig) -> Self {
        Self {
            portals,
            generator: config.generator,
            limits: config.limits,
            scoring: config.scoring,
        }
    }

    /// Build the plan of `trial` under the run `seed`.
    ///
    /// Fails with [`PlanError::Infeasible`] when the portals cannot hold a
    /// single field, or when no field could be built this trial.
    pub fn generate(&self, seed: u64, trial: u64) -> Result<Plan, PlanError> {
        let infeasible = |reason: &str| PlanError::Infeasible {
            reason: reason.to_string(),
            portals: self.portals.len(),
            trials: 1,
        };
        if self.portals.len() < 3 {
            return Err(infeasible("fewer than 3 portals"));
        }
        if self.portals.hull().len() < 3 {
            return Err(infeasible("all portals are collinear"));
        }

        let mut state = TrialState {
            graph: LinkGraph::new(self.portals, &self.limits),
            rng: trial_rng(seed, trial),
            ears: Vec::new(),
            all: (0..self.portals.len()).collect(),
        };
        let mut perimeter: Vec<PortalId> = self.portals.hull().to_vec();

        while perimeter.len() >= 3 {
            let mut budget = self.generator.ear_search_budget.max(1);
            if self.make_fields(&perimeter, &mut state, &mut budget) {
                break;
            }
            // No ordering fields the whole polygon: commit one ear (or drop
            // one tip) and search the smaller polygon again.
            let tip = self.greedy_ear(&perimeter, &mut state, trial);
            perimeter.remove(tip);
        }

        let mut fields = Vec::new();
        let mut roots = Vec::with_capacity(state.ears.len());
        for ear in &state.ears {
            roots.push(ear.flatten(&state.graph, None, 0, &mut fields)?);
        }
        if fields.is_empty() {
            return Err(infeasible("no field could be built"));
        }

        let plan = Plan::new(
            self.portals,
            &self.scoring,
            seed,
            trial,
            state.graph.into_links(),
            fields,
            roots,
        );
        debug!(
            trial,
            links = plan.links.len(),
            fields = plan.fields.len(),
            unused = plan.unused.len(),
            ap = plan.total_ap(),
            "Trial complete"
        );
        Ok(plan)
    }

    /// Field the whole polygon, backtracking over ear orderings.
    ///
    /// On failure the graph and ear list are left as they were on entry.
    fn make_fields(
        &self,
        perimeter: &[PortalId],
        state: &mut TrialState,
        budget: &mut usize,
    ) -> bool {
        if perimeter.len() < 3 {
            return true;
        }
        let checkpoint = state.graph.len();
        let mut order: Vec<usize> = (0..perimeter.len()).collect();
        order.shuffle(&mut state.rng);

        for i in order {
            if *budget == 0 {
                return false;
            }
            *budget -= 1;

            let mut ear = self.ear_at(perimeter, i, state);
            if let Err(err) = self.build_ear(&mut ear, state) {
                trace!(tip = perimeter[i], ?err, "Ear failed");
                continue;
            }
            let rest: Vec<PortalId> = perimeter
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .map(|(_, &p)| p)
                .collect();
            if self.make_fields(&rest, state, budget) {
                state.ears.push(ear);
                return true;
            }
            state.graph.truncate(checkpoint);
        }
        false
    }

    /// Build the first ear that works in a random order and return its tip
    /// index. When none works, the ear at the first tip is abandoned along
    /// with everything inside it.
    fn greedy_ear(&self, perimeter: &[PortalId], state: &mut TrialState, trial: u64) -> usize {
        let mut order: Vec<usize> = (0..perimeter.len()).collect();
        order.shuffle(&mut state.rng);
        for &i in &order {
            let mut ear = self.ear_at(perimeter, i, state);
            match self.build_ear(&mut ear, state) {
                Ok(()) => {
                    state.ears.push(ear);
                    return i;
                }
                Err(err) => trace!(trial, tip = perimeter[i], ?err, "Ear failed"),
            }
        }
        debug!(trial, tip = perimeter[order[0]], "Abandoning ear");
        order[0]
    }

    /// The first-generation field on tip `i` and its two neighbours.
    fn ear_at(&self, perimeter: &[PortalId], i: usize, state: &TrialState) -> FieldNode {
        let m = perimeter.len();
        let vertices = [perimeter[i], perimeter[(i + m - 1) % m], perimeter[(i + 1) % m]];
        FieldNode::new(vertices, true, &state.all, self.portals)
    }

    /// Try to lay down one ear, rolling the graph back after each failure.
    /// Every attempt draws a fresh anchor order.
    fn build_ear(&self, ear: &mut FieldNode, state: &mut TrialState) -> Result<(), DeadEnd> {
        // The last triangle of the polygon can be closed by earlier ears
        // alone. Keep it as a field when nothing inside needs fielding.
        let [v0, v1, v2] = ear.vertices;
        let graph = &mut state.graph;
        if graph.has_link(v0, v1) && graph.has_link(v0, v2) && graph.has_link(v1, v2) {
            return if ear.contents.is_empty() {
                Ok(())
            } else {
                Err(DeadEnd::ClosedByNeighbour)
            };
        }

        let checkpoint = graph.len();
        let mut last = DeadEnd::RollbacksExhausted;
        for _ in 0..self.generator.attempts_per_ear.max(1) {
            ear.vertices.shuffle(&mut state.rng);
            let mut ctx = BuildContext {
                portals: self.portals,
                graph: &mut state.graph,
                rng: &mut state.rng,
                pivot_retries: self.generator.pivot_retries,
                rollbacks_left: self.generator.rollback_budget,
            };
            let result = ear
                .build_links(&mut ctx)
                .and_then(|()| ear.build_final_links(&mut ctx));
            match result {
                Ok(()) => return Ok(()),
                Err(err) => {
                    state.graph.truncate(checkpoint);
                    last = err;
                }
            }
        }
        Err(last)
    }
}

/// Mutable state of one trial.
struct TrialState {
    graph: LinkGraph,
    rng: ChaCha8Rng,
    /// Completed first-generation fields
    ears: Vec<FieldNode>,
    all: Vec<PortalId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::{PortalScenario, PortalScenarioConfig};
    use field_kernel::Portal;

    fn three_portals() -> PortalSet {
        PortalSet::new(vec![
            Portal::new("Alpha", 37.0, -122.0),
            Portal::new("Bravo", 37.0, -121.99),
            Portal::new("Charlie", 37.008, -121.995),
        ])
        .unwrap()
    }

    #[test]
    fn test_three_portals_make_one_field() {
        let set = three_portals();
        let config = PlannerConfig::default();
        let plan = PlanGenerator::new(&set, &config).generate(1, 0).unwrap();

        assert_eq!(plan.links.len(), 3);
        assert_eq!(plan.fields.len(), 1);
        assert_eq!(plan.total_ap(), 3 * 1750 + 3 * 313 + 1250);
        plan.validate(&set, &config.limits).unwrap();
    }

    #[test]
    fn test_fewer_than_three_portals_is_infeasible() {
        let set = PortalSet::new(vec![
            Portal::new("Alpha", 37.0, -122.0),
            Portal::new("Bravo", 37.0, -121.99),
        ])
        .unwrap();
        let err = PlanGenerator::new(&set, &PlannerConfig::default())
            .generate(1, 0)
            .unwrap_err();
        assert!(matches!(err, PlanError::Infeasible { portals: 2, .. }));
    }

    #[test]
    fn test_collinear_portals_are_infeasible() {
        let set = PortalSet::new(vec![
            Portal::new("A", 0.0, 0.0),
            Portal::new("B", 0.0, 0.01),
            Portal::new("C", 0.0, 0.02),
        ])
        .unwrap();
        assert!(
            PlanGenerator::new(&set, &PlannerConfig::default())
                .generate(1, 0)
                .is_err()
        );
    }

    #[test]
    fn test_generated_plans_hold_invariants() {
        let portals = PortalScenario::new(PortalScenarioConfig::medium(), 11).generate();
        let set = PortalSet::new(portals).unwrap();
        let config = PlannerConfig::default();
        let generator = PlanGenerator::new(&set, &config);
        for trial in 0..10 {
            let plan = generator.generate(5, trial).unwrap();
            plan.validate(&set, &config.limits).unwrap();
            assert!(!plan.fields.is_empty());
            // A full triangulation of n points with h on the hull has 3n-3-h edges
            assert!(plan.links.len() <= 3 * set.len() - 3 - set.hull().len());
        }
    }

    #[test]
    fn test_default_limits_field_every_portal() {
        let config = PlannerConfig::default();
        for scenario in [2, 11] {
            let portals = PortalScenario::new(PortalScenarioConfig::medium(), scenario).generate();
            let set = PortalSet::new(portals).unwrap();
            let generator = PlanGenerator::new(&set, &config);
            for trial in 0..10 {
                let plan = generator.generate(5, trial).unwrap();
                assert!(
                    plan.unused.is_empty(),
                    "scenario {scenario} trial {trial} left {:?} unused",
                    plan.unused
                );
                assert_eq!(plan.links.len(), 3 * set.len() - 3 - set.hull().len());
            }
        }
    }

    #[test]
    fn test_tight_limits_respect_capacity() {
        let scenario = PortalScenarioConfig {
            boosted_fraction: 0.3,
            ..PortalScenarioConfig::medium()
        };
        let mut portals = PortalScenario::new(scenario, 23).generate();
        portals[0] = portals[0].clone().boosted();
        portals[1].boosted = false;
        let set = PortalSet::new(portals).unwrap();

        let mut config = PlannerConfig::default();
        config.limits.normal_out_links = 2;
        config.limits.boosted_out_links = 3;
        config.generator.attempts_per_ear = 20;
        config.generator.ear_search_budget = 64;
        let generator = PlanGenerator::new(&set, &config);

        let capacity: usize = (0..set.len())
            .map(|p| set.max_out_links(p, &config.limits))
            .sum();
        let full = 3 * set.len() - 3 - set.hull().len();
        for trial in 0..5 {
            let plan = match generator.generate(8, trial) {
                Ok(plan) => plan,
                Err(err) => {
                    assert!(matches!(err, PlanError::Infeasible { .. }));
                    continue;
                }
            };
            plan.validate(&set, &config.limits).unwrap();
            let mut out = vec![0usize; set.len()];
            for link in &plan.links {
                out[link.origin] += 1;
            }
            for (portal, &degree) in out.iter().enumerate() {
                assert!(degree <= set.max_out_links(portal, &config.limits));
            }
            assert!(plan.links.len() <= capacity);
            if capacity < full {
                assert!(plan.links.len() < full);
            }
        }
    }

    #[test]
    fn test_same_seed_same_plan() {
        let portals = PortalScenario::new(PortalScenarioConfig::medium(), 3).generate();
        let set = PortalSet::new(portals).unwrap();
        let config = PlannerConfig::default();
        let generator = PlanGenerator::new(&set, &config);
        assert_eq!(generator.generate(42, 7).unwrap(), generator.generate(42, 7).unwrap());
    }

    #[test]
    fn test_trials_draw_independent_streams() {
        use rand::RngCore;
        let mut a = trial_rng(9, 0);
        let mut b = trial_rng(9, 1);
        assert_ne!(a.next_u64(), b.next_u64());
    }
}
