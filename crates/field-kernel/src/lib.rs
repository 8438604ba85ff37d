//! Field Kernel: geometry, link bookkeeping and routing primitives for
//! portal field planning.
//!
//! This crate holds the pieces every planning stage shares: projected portal
//! geometry, the link arena with outbound capacity, the configuration tree,
//! the error taxonomy and the route solver seam.

pub mod config;
pub mod error;
pub mod geometry;
pub mod graph;
pub mod portal;
pub mod solver;

pub use config::{
    GeneratorConfig, LinkLimits, PlannerConfig, RouteObjective, RoutingConfig, ScoringConfig,
    SequencerConfig, TravelAnchor,
};
pub use error::PlanError;
pub use geometry::{LatLng, Point};
pub use graph::LinkGraph;
pub use portal::{Field, FieldId, Link, LinkId, Portal, PortalId, PortalSet};
pub use solver::{
    RouteCost, RouteSolution, RouteSolver, RoutingModel, Schedule, ScheduledVisit, SolverBudget,
    Visit,
};
