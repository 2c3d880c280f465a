//! Phase routing.
//!
//! [`RULES`] is an ordered table; the first rule that returns a route wins.

use cadence_config::OrchestratorConfig;
use serde::{Deserialize, Serialize};

use crate::state::{ErrorKind, Node, RunState, TaskStatus};

/// Where control goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    TaskPlanner,
    TaskExecutor,
    TaskVerifier,
    MemoryConsolidator,
    End,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::TaskPlanner => "task_planner",
            Route::TaskExecutor => "task_executor",
            Route::TaskVerifier => "task_verifier",
            Route::MemoryConsolidator => "memory_consolidator",
            Route::End => "end",
        }
    }

    /// Parse a phase name used in a skip-validation directive. `End` is not a
    /// valid target.
    pub fn from_target(name: &str) -> Option<Route> {
        match name {
            "task_planner" => Some(Route::TaskPlanner),
            "task_executor" => Some(Route::TaskExecutor),
            "task_verifier" => Some(Route::TaskVerifier),
            "memory_consolidator" => Some(Route::MemoryConsolidator),
            _ => None,
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named routing rule. `decide` returns `None` when the rule does not apply.
pub struct Rule {
    pub name: &'static str,
    pub decide: fn(&RunState, &OrchestratorConfig) -> Option<Route>,
}

pub const RULES: [Rule; 7] = [
    Rule {
        name: "terminal_error",
        decide: terminal_error,
    },
    Rule {
        name: "skip_validation",
        decide: skip_validation,
    },
    Rule {
        name: "verified_task",
        decide: verified_task,
    },
    Rule {
        name: "after_consolidation",
        decide: after_consolidation,
    },
    Rule {
        name: "after_execution",
        decide: after_execution,
    },
    Rule {
        name: "after_planning",
        decide: after_planning,
    },
    Rule {
        name: "default",
        decide: default_route,
    },
];

/// The next phase for `state`.
pub fn route(state: &RunState, config: &OrchestratorConfig) -> Route {
    explain(state, config).0
}

/// The next phase and the name of the rule that chose it.
pub fn explain(state: &RunState, config: &OrchestratorConfig) -> (Route, &'static str) {
    RULES
        .iter()
        .find_map(|rule| (rule.decide)(state, config).map(|r| (r, rule.name)))
        .unwrap_or((Route::TaskExecutor, "default"))
}

fn finished_or_absent(state: &RunState) -> bool {
    state.active_task().is_none_or(|t| t.status.is_finished())
}

/// Any active error except a blocked task ends the run, and so does any
/// active error once the retry ceiling is reached.
fn terminal_error(state: &RunState, config: &OrchestratorConfig) -> Option<Route> {
    let error = state.active_error()?;
    (error.kind != ErrorKind::BlockedTask || state.retry >= config.max_retries).then_some(Route::End)
}

fn skip_validation(state: &RunState, _: &OrchestratorConfig) -> Option<Route> {
    let target = state.skip_validation.as_deref()?;
    Some(Route::from_target(target).unwrap_or(Route::End))
}

fn verified_task(state: &RunState, _: &OrchestratorConfig) -> Option<Route> {
    (state.last_node == Some(Node::UpdateTask)
        && state.active_task().is_some_and(|t| t.status.is_finished()))
    .then_some(Route::MemoryConsolidator)
}

fn after_consolidation(state: &RunState, _: &OrchestratorConfig) -> Option<Route> {
    if state.last_node != Some(Node::MemoryConsolidator) {
        return None;
    }
    Some(if finished_or_absent(state) {
        Route::TaskPlanner
    } else {
        Route::TaskExecutor
    })
}

fn after_execution(state: &RunState, _: &OrchestratorConfig) -> Option<Route> {
    if state.last_node != Some(Node::TaskExecutor) {
        return None;
    }
    if state
        .active_error()
        .is_some_and(|e| e.kind == ErrorKind::BlockedTask)
    {
        return Some(Route::TaskPlanner);
    }
    let awaiting = state
        .active_task()
        .is_some_and(|t| t.status == TaskStatus::AwaitingVerification);
    Some(if awaiting {
        Route::TaskVerifier
    } else {
        Route::MemoryConsolidator
    })
}

fn after_planning(state: &RunState, _: &OrchestratorConfig) -> Option<Route> {
    (state.last_node == Some(Node::TaskPlanner)).then_some(Route::MemoryConsolidator)
}

fn default_route(_: &RunState, _: &OrchestratorConfig) -> Option<Route> {
    Some(Route::TaskExecutor)
}
