//! Best-of-N plan selection.
//!
//! Trials run on tokio's blocking pool, at most `parallelism` at a time.
//! Every plan a trial builds is validated and sequenced before it is scored,
//! so the walk length in its score is the walk agents will actually make.
//! The winner is the maximum [`PlanScore`](crate::plan::PlanScore), a total
//! order, so the selected plan does not depend on which trial finished first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use field_kernel::{PlanError, PlannerConfig, PortalSet};

use crate::generator::PlanGenerator;
use crate::plan::Plan;
use crate::sequencer::{LinkSequencer, Sequence};

/// How the trials of one selection went.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialStats {
    pub requested: usize,
    pub completed: usize,
    pub failed: usize,
    /// Trials not started before the trial budget ran out.
    pub skipped: usize,
    pub best_trial: u64,
    pub best_ap: u64,
    pub worst_ap: u64,
    pub mean_ap: f64,
    pub elapsed_ms: u64,
}

/// The winning plan, its link sequence and the statistics of the trials
/// behind it.
#[derive(Debug, Clone)]
pub struct Selection {
    pub plan: Plan,
    pub sequence: Sequence,
    pub stats: TrialStats,
}

enum TrialOutcome {
    Built(Box<(Plan, Sequence)>),
    Failed(u64, String),
    /// The trial built a plan that breaks its own invariants.
    Fault(u64, PlanError),
    Skipped,
}

/// Validate a freshly generated plan and sequence its links.
///
/// The plan's walk length is set to the sequenced walk. Fails with
/// [`PlanError::InvalidGeometry`] or [`PlanError::CyclicPrecedence`] when
/// the plan is broken.
pub fn check_trial(
    portals: &PortalSet,
    config: &PlannerConfig,
    mut plan: Plan,
) -> Result<(Plan, Sequence), PlanError> {
    plan.validate(portals, &config.limits)?;
    let sequence = LinkSequencer::new(portals, config.sequencer, config.routing.travel_anchor)
        .sequence(&plan)?;
    plan.walk_length = sequence.walk_length;
    Ok((plan, sequence))
}

fn run_trial(portals: &PortalSet, config: &PlannerConfig, seed: u64, trial: u64) -> TrialOutcome {
    let plan = match PlanGenerator::new(portals, config).generate(seed, trial) {
        Ok(plan) => plan,
        Err(err) => return TrialOutcome::Failed(trial, err.to_string()),
    };
    match check_trial(portals, config, plan) {
        Ok(built) => TrialOutcome::Built(Box::new(built)),
        Err(err) => TrialOutcome::Fault(trial, err),
    }
}

pub struct PlanSelector {
    portals: Arc<PortalSet>,
    config: PlannerConfig,
}

impl PlanSelector {
    pub fn new(portals: Arc<PortalSet>, config: PlannerConfig) -> Self {
        Self { portals, config }
    }

    /// Run every trial under `seed` and keep the best plan.
    ///
    /// Fails with [`PlanError::Infeasible`] without running any trial when
    /// the portals cannot hold a field, and after the trials when none of
    /// them produced one. A trial whose plan fails validation or cannot be
    /// sequenced fails the whole selection with that trial's error; when
    /// several do, the lowest trial index is reported.
    pub async fn select(&self, seed: u64) -> Result<Selection, PlanError> {
        let portals = self.portals.len();
        if portals < 3 || self.portals.hull().len() < 3 {
            return Err(PlanError::Infeasible {
                reason: if portals < 3 {
                    "fewer than 3 portals".to_string()
                } else {
                    "all portals are collinear".to_string()
                },
                portals,
                trials: 0,
            });
        }

        let trials = self.config.trials;
        let workers = self.config.effective_parallelism();
        let started = Instant::now();
        let deadline = self
            .config
            .trial_budget_ms
            .map(|ms| tokio::time::Instant::now() + Duration::from_millis(ms));
        info!(seed, trials, workers, portals, "Starting plan selection");

        let semaphore = Arc::new(Semaphore::new(workers.max(1)));
        let stop = Arc::new(AtomicBool::new(false));
        let mut pending = FuturesUnordered::new();
        for trial in 0..trials as u64 {
            let portals = Arc::clone(&self.portals);
            let config = self.config.clone();
            let semaphore = Arc::clone(&semaphore);
            let stop = Arc::clone(&stop);
            pending.push(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return TrialOutcome::Skipped;
                };
                if stop.load(Ordering::Relaxed) {
                    return TrialOutcome::Skipped;
                }
                let handle = tokio::task::spawn_blocking(move || {
                    run_trial(&portals, &config, seed, trial)
                });
                match handle.await {
                    Ok(outcome) => outcome,
                    Err(err) => TrialOutcome::Failed(trial, format!("trial task failed: {err}")),
                }
            });
        }

        let mut best: Option<(Plan, Sequence)> = None;
        let mut fault: Option<(u64, PlanError)> = None;
        let (mut completed, mut failed, mut skipped) = (0, 0, 0);
        let (mut ap_sum, mut worst_ap) = (0u64, u64::MAX);
        loop {
            let next = match deadline {
                Some(at) if !stop.load(Ordering::Relaxed) => {
                    match tokio::time::timeout_at(at, pending.next()).await {
                        Ok(next) => next,
                        Err(_) => {
                            warn!(completed, "Trial budget elapsed, skipping remaining trials");
                            stop.store(true, Ordering::Relaxed);
                            continue;
                        }
                    }
                }
                _ => pending.next().await,
            };
            let Some(outcome) = next else { break };

            match outcome {
                TrialOutcome::Built(built) => {
                    let (plan, sequence) = *built;
                    completed += 1;
                    let ap = plan.total_ap();
                    ap_sum += ap;
                    worst_ap = worst_ap.min(ap);
                    if best.as_ref().is_none_or(|(b, _)| plan.score() > b.score()) {
                        debug!(trial = plan.trial, ap, fields = plan.fields.len(), "New best plan");
                        best = Some((plan, sequence));
                    }
                }
                TrialOutcome::Fault(trial, err) => {
                    failed += 1;
                    warn!(trial, error = %err, "Trial built an inconsistent plan");
                    if fault.as_ref().is_none_or(|(t, _)| trial < *t) {
                        fault = Some((trial, err));
                    }
                }
                TrialOutcome::Failed(trial, reason) => {
                    failed += 1;
                    debug!(trial, %reason, "Trial produced no plan");
                }
                TrialOutcome::Skipped => skipped += 1,
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if let Some((_, err)) = fault {
            return Err(err);
        }
        let Some((plan, sequence)) = best else {
            return Err(PlanError::Infeasible {
                reason: "no trial produced a field".to_string(),
                portals,
                trials: completed + failed,
            });
        };

        let stats = TrialStats {
            requested: trials,
            completed,
            failed,
            skipped,
            best_trial: plan.trial,
            best_ap: plan.total_ap(),
            worst_ap,
            mean_ap: ap_sum as f64 / completed as f64,
            elapsed_ms,
        };
        info!(
            best_trial = stats.best_trial,
            best_ap = stats.best_ap,
            completed,
            failed,
            skipped,
            elapsed_ms,
            "Plan selection complete"
        );
        Ok(Selection {
            plan,
            sequence,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::{PortalScenario, PortalScenarioConfig};
    use field_kernel::Portal;

    fn medium_set(seed: u64) -> Arc<PortalSet> {
        let portals = PortalScenario::new(PortalScenarioConfig::medium(), seed).generate();
        Arc::new(PortalSet::new(portals).unwrap())
    }

    fn config(trials: usize, parallelism: usize) -> PlannerConfig {
        PlannerConfig {
            trials,
            parallelism,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_selection_is_independent_of_parallelism() {
        let set = medium_set(8);
        let serial = PlanSelector::new(Arc::clone(&set), config(12, 1))
            .select(99)
            .await
            .unwrap();
        let parallel = PlanSelector::new(set, config(12, 4)).select(99).await.unwrap();
        assert_eq!(serial.plan, parallel.plan);
        assert_eq!(serial.stats.completed, 12);
    }

    #[tokio::test]
    async fn test_best_ap_does_not_drop_with_more_trials() {
        let set = medium_set(21);
        let mut previous = 0;
        for trials in [1, 4, 16] {
            let selection = PlanSelector::new(Arc::clone(&set), config(trials, 0))
                .select(5)
                .await
                .unwrap();
            assert!(selection.stats.best_ap >= previous);
            assert!(selection.stats.best_ap >= selection.stats.worst_ap);
            previous = selection.stats.best_ap;
        }
    }

    #[test]
    fn test_checked_trial_carries_sequenced_walk() {
        let set = medium_set(6);
        let config = PlannerConfig::default();
        let plan = PlanGenerator::new(&set, &config).generate(6, 0).unwrap();
        assert_eq!(plan.walk_length, 0);

        let (plan, sequence) = check_trial(&set, &config, plan).unwrap();
        assert!(plan.walk_length > 0);
        assert_eq!(plan.walk_length, sequence.walk_length);
        assert_eq!(sequence.len(), plan.links.len());
    }

    #[test]
    fn test_checked_trial_rejects_broken_plan() {
        let set = medium_set(6);
        let config = PlannerConfig::default();
        let mut plan = PlanGenerator::new(&set, &config).generate(6, 1).unwrap();
        // A second link between the endpoints of an existing one
        let first = plan.links[0];
        plan.links.push(field_kernel::Link {
            id: plan.links.len(),
            origin: first.destination,
            destination: first.origin,
            reversible: false,
        });
        let err = check_trial(&set, &config, plan).unwrap_err();
        assert!(matches!(err, PlanError::InvalidGeometry(_)));
    }

    #[tokio::test]
    async fn test_selected_plan_is_valid_and_sequenced() {
        let set = medium_set(13);
        let config = config(6, 0);
        let selection = PlanSelector::new(Arc::clone(&set), config.clone())
            .select(13)
            .await
            .unwrap();
        selection.plan.validate(&set, &config.limits).unwrap();
        assert_eq!(selection.plan.walk_length, selection.sequence.walk_length);
        assert_eq!(selection.sequence.len(), selection.plan.links.len());
    }

    #[tokio::test]
    async fn test_tiny_portal_sets_fail_without_trials() {
        for count in 0..3 {
            let portals: Vec<Portal> = (0..count)
                .map(|i| Portal::new(format!("P{i}"), 10.0, 10.0 + i as f64 * 0.001))
                .collect();
            let set = Arc::new(PortalSet::new(portals).unwrap());
            let err = PlanSelector::new(set, config(10, 0))
                .select(1)
                .await
                .unwrap_err();
            assert!(matches!(err, PlanError::Infeasible { trials: 0, .. }));
        }
    }
}
