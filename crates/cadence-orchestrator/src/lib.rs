//! # cadence-orchestrator
//!
//! The run state machine: a planner creates tasks one at a time, an executor
//! works them, a verifier judges them, and a consolidator moves outcomes
//! into long-term memory. A pure rule table decides what runs next.

pub mod consolidator;
pub mod context;
pub mod executor;
pub mod orchestrator;
pub mod planner;
pub mod router;
pub mod state;
pub mod verifier;

pub use consolidator::{MemoryConsolidator, StoreConsolidator};
pub use context::RunContext;
pub use executor::{CognitiveExecutor, ExecutionStatus, StepOutcome, TaskExecutor};
pub use orchestrator::{
    Checkpoint, Orchestrator, RunOutcome, RunRequest, Termination, TerminationReason,
};
pub use planner::{PlannerOutcome, PlannerRoute, TaskPlanner, planner_actions, planner_route};
pub use router::{RULES, Route, Rule, explain, route};
pub use state::*;
pub use verifier::{TaskVerifier, Verdict, VerifierOutcome};
