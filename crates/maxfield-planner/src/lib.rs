//! Maxfield Planner - randomized field plans and multi-agent link schedules.
//!
//! A run moves through four stages:
//!
//! 1. **Generation**: each trial subdivides the convex hull of the portals
//!    into nested triangular fields ([`generator`], [`field`])
//! 2. **Selection**: many seeded trials run in parallel and the best
//!    [`plan::PlanScore`] wins ([`selector`])
//! 3. **Sequencing**: links are ordered to respect field precedence while
//!    keeping the walk short ([`sequencer`])
//! 4. **Routing**: the sequence is split across agents by an injectable
//!    solver with a greedy fallback ([`router`], [`local_search`])
//!
//! [`pipeline::Planner`] runs all four; [`results::PlanReport`] turns the
//! outcome into something an operator can read.

pub mod field;
pub mod generator;
pub mod local_search;
pub mod pipeline;
pub mod plan;
pub mod results;
pub mod router;
pub mod scenario;
pub mod selector;
pub mod sequencer;

pub use generator::PlanGenerator;
pub use local_search::LocalSearchSolver;
pub use pipeline::{PlanOutcome, Planner};
pub use plan::{ApBreakdown, KeyRequirement, Plan, PlanScore};
pub use results::PlanReport;
pub use router::{AgentRoute, Assignment, RouteAssignment, RouteOptimizer, RouteQuality};
pub use scenario::{PortalScenario, PortalScenarioConfig};
pub use selector::{PlanSelector, Selection, TrialStats};
pub use sequencer::{LinkSequencer, PrecedenceGraph, Sequence};
