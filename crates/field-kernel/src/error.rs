//! Failure taxonomy shared by every planning stage.

use thiserror::Error;

use crate::portal::PortalId;

/// A typed planning failure carrying enough context to tell which stage failed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PlanError {
    /// No usable plan or route exists under the current constraints.
    #[error("no feasible plan: {reason} ({portals} portals, {trials} trials attempted)")]
    Infeasible {
        reason: String,
        portals: usize,
        trials: usize,
    },

    /// The derived precedence relation has a cycle. Indicates a geometry bug.
    #[error("link precedence is cyclic: {unscheduled} of {links} links could not be ordered")]
    CyclicPrecedence { unscheduled: usize, links: usize },

    /// The route solver ran out of time or candidates before finding a route.
    #[error("route solver exhausted its budget after {evaluated} candidates in {elapsed_ms}ms")]
    SolverTimeout { evaluated: usize, elapsed_ms: u64 },

    /// A portal has no outbound capacity left for a required link.
    #[error("portal {portal} has reached its outbound link limit of {limit}")]
    ResourceExceeded { portal: PortalId, limit: usize },

    /// The plan violates a geometric invariant it should hold by construction.
    #[error("plan geometry is inconsistent: {0}")]
    InvalidGeometry(String),

    /// Rejected portal records or configuration values.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl PlanError {
    /// Whether a caller can recover by degrading quality instead of failing.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PlanError::SolverTimeout { .. } | PlanError::ResourceExceeded { .. }
        )
    }
}
