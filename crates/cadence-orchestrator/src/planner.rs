use cadence_config::OrchestratorConfig;
use cadence_core::{Message, Role, TaskId, Tool, ToolCall};
use cadence_llm::{LlmProvider, LlmRequest, UsageMeter};
use serde_json::json;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::state::{ErrorKind, ErrorRecord, Node, RunState, Task};

const SOURCE: &str = "task_planner";

pub const CREATE_TASK: &str = "create_task";
pub const BLOCK_TASK: &str = "block_task";
pub const END_ORCHESTRATION: &str = "end_orchestration";

/// What one planner invocation decided.
#[derive(Debug, Clone, PartialEq)]
pub enum PlannerOutcome {
    /// A task was appended and made active.
    Created(TaskId),
    /// The planner asked to stop; the run ends with this summary.
    End { summary: String },
    /// Nothing was created; see `RunState::error`.
    NoTask,
}

/// Local routing after a planner invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannerRoute {
    /// Ask the planner again.
    Retry,
    /// Retry ceiling reached on a retryable failure.
    End,
    /// Hand control back to the run router.
    Exit,
}

pub fn planner_route(state: &RunState, config: &OrchestratorConfig) -> PlannerRoute {
    match state.active_error() {
        Some(e) if e.kind.is_retryable() => {
            if state.retry < config.max_retries {
                PlannerRoute::Retry
            } else {
                PlannerRoute::End
            }
        }
        _ => PlannerRoute::Exit,
    }
}

/// The closed set of actions the planner may call.
pub fn planner_actions() -> Vec<Tool> {
    vec![
        Tool::new(
            CREATE_TASK,
            "Create the next task to work on.",
            json!({
                "type": "object",
                "properties": {
                    "directive": {"type": "string", "description": "What the task must accomplish, stated so it can be verified."},
                    "reasoning": {"type": "string", "description": "Why this is the right next task."}
                },
                "required": ["directive", "reasoning"]
            }),
        ),
        Tool::new(
            BLOCK_TASK,
            "Abort the run because the objective cannot be pursued.",
            json!({
                "type": "object",
                "properties": {
                    "reason": {"type": "string"}
                },
                "required": ["reason"]
            }),
        ),
        Tool::new(
            END_ORCHESTRATION,
            "Finish the run because the objective has been met.",
            json!({
                "type": "object",
                "properties": {
                    "summary": {"type": "string", "description": "What was achieved."}
                },
                "required": ["summary"]
            }),
        ),
    ]
}

/// Creates at most one task per invocation from a single model decision.
pub struct TaskPlanner {
    llm: Arc<dyn LlmProvider>,
    usage: UsageMeter,
}

impl TaskPlanner {
    pub fn new(llm: Arc<dyn LlmProvider>, usage: UsageMeter) -> Self {
        Self { llm, usage }
    }

    pub async fn plan(
        &self,
        state: &mut RunState,
        ctx: &RunContext,
        config: &OrchestratorConfig,
    ) -> PlannerOutcome {
        state.last_node = Some(Node::TaskPlanner);

        if let Some(missing) = missing_setting(ctx) {
            warn!(thread_id = %ctx.thread_id, missing, "planner is not configured");
            state.fail(
                ErrorKind::ManagerError,
                SOURCE,
                format!("planner misconfigured: {missing} is empty"),
            );
            return PlannerOutcome::NoTask;
        }

        if state.step_count >= config.max_steps {
            warn!(thread_id = %ctx.thread_id, steps = state.step_count, "step ceiling reached");
            state.fail(
                ErrorKind::StepLimitExceeded,
                SOURCE,
                format!("step limit of {} tasks reached", config.max_steps),
            );
            return PlannerOutcome::NoTask;
        }

        let request = LlmRequest {
            model: ctx.agent.model.clone(),
            messages: vec![Message::text(Role::User, build_prompt(state, ctx))],
            tools: planner_actions(),
            require_tool: true,
            system: Some(system_prompt(ctx)),
            max_tokens: ctx.agent.max_tokens,
            temperature: ctx.agent.temperature,
        };

        let response = match self.llm.complete(&request).await {
            Ok(r) => r,
            Err(e) => {
                warn!(thread_id = %ctx.thread_id, error = %e, "planner model call failed");
                state.fail(ErrorKind::ManagerError, SOURCE, e.to_string());
                return PlannerOutcome::NoTask;
            }
        };
        self.usage.record(SOURCE, &response.usage);

        let calls = response.message.tool_calls.clone();
        let mut logged = response.message;
        logged.metadata.insert("phase".into(), SOURCE.into());
        state.messages.push(logged);

        match calls.as_slice() {
            [] => self.reject(
                state,
                config,
                ErrorKind::WrongActionCount,
                "planner chose no action".into(),
            ),
            [call] => self.apply(state, ctx, config, call),
            many => self.reject(
                state,
                config,
                ErrorKind::WrongActionCount,
                format!("planner chose {} actions, expected exactly one", many.len()),
            ),
        }
    }

    fn apply(
        &self,
        state: &mut RunState,
        ctx: &RunContext,
        config: &OrchestratorConfig,
        call: &ToolCall,
    ) -> PlannerOutcome {
        match call.tool_name.as_str() {
            CREATE_TASK => {
                let Some(directive) = call.str_arg("directive") else {
                    return self.reject(
                        state,
                        config,
                        ErrorKind::UnrecognizedAction,
                        "create_task called without a directive".into(),
                    );
                };
                let task = Task::new(directive, call.str_arg("reasoning").unwrap_or_default());
                let id = task.id;
                info!(thread_id = %ctx.thread_id, task_id = %id, directive, "planned task");
                state.tasks.push(task);
                state.active_task_id = Some(id);
                state.error = None;
                state.step_count += 1;
                PlannerOutcome::Created(id)
            }
            BLOCK_TASK => {
                let reason = call.str_arg("reason").unwrap_or("no reason given");
                info!(thread_id = %ctx.thread_id, reason, "planner aborted the run");
                state.fail(ErrorKind::TaskAborted, SOURCE, format!("task aborted: {reason}"));
                PlannerOutcome::NoTask
            }
            END_ORCHESTRATION => {
                let summary = call.str_arg("summary").unwrap_or("objective complete").to_string();
                info!(thread_id = %ctx.thread_id, "planner ended the run");
                PlannerOutcome::End { summary }
            }
            other => self.reject(
                state,
                config,
                ErrorKind::UnrecognizedAction,
                format!("unrecognized action '{other}'"),
            ),
        }
    }

    fn reject(
        &self,
        state: &mut RunState,
        config: &OrchestratorConfig,
        kind: ErrorKind,
        message: String,
    ) -> PlannerOutcome {
        let retry = state.bump_retry(config.max_retries);
        debug!(%kind, retry, %message, "planner decision rejected");
        state.error = Some(ErrorRecord::active(kind, SOURCE, message));
        PlannerOutcome::NoTask
    }
}

fn missing_setting(ctx: &RunContext) -> Option<&'static str> {
    if ctx.agent.model.trim().is_empty() {
        Some("agent.model")
    } else if ctx.agent.name.trim().is_empty() {
        Some("agent.name")
    } else if ctx.objective.trim().is_empty() {
        Some("objective")
    } else {
        None
    }
}

fn system_prompt(ctx: &RunContext) -> String {
    let mut prompt = format!("You are {}, {}.\n", ctx.agent.name, ctx.agent.role);
    if let Some(ref extra) = ctx.agent.instructions {
        prompt.push_str(extra.trim());
        prompt.push('\n');
    }
    prompt.push_str(
        "\nYou plan work one task at a time. Call exactly one action:\n\
         - create_task when more work is needed; the directive must be concrete and checkable\n\
         - end_orchestration when the objective has been met\n\
         - block_task when the objective cannot be pursued at all",
    );
    prompt
}

fn build_prompt(state: &RunState, ctx: &RunContext) -> String {
    let mut prompt = format!("Objective: {}\n\nTasks so far:\n", ctx.objective);

    if state.tasks.is_empty() {
        prompt.push_str("(none)\n");
    }
    for (i, task) in state.tasks.iter().enumerate() {
        let _ = write!(prompt, "{}. [{}] {}", i + 1, task.status.as_str(), task.directive);
        if let Some(ref note) = task.verification {
            let _ = write!(prompt, " (verification: {note})");
        }
        prompt.push('\n');
    }

    if let Some(ref error) = state.error {
        let _ = write!(prompt, "\nLast failure ({}): {}\n", error.kind, error.message);
    }

    if !state.rag_context.is_empty() {
        let _ = write!(prompt, "\nRelevant memories:\n{}\n", state.rag_context);
    }

    prompt
}
