use cadence_config::{AgentConfig, CadenceConfig, OrchestratorConfig};
use cadence_core::{
    CadenceError, Event, EventBus, Message, MessageContent, Result, Role, TaskId, ThreadId, UserId,
    new_thread_id,
};
use cadence_llm::{LlmProvider, UsageMeter};
use cadence_memory::{CheckpointRecord, CheckpointStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::consolidator::MemoryConsolidator;
use crate::context::RunContext;
use crate::executor::{ExecutionStatus, StepOutcome, TaskExecutor};
use crate::planner::{PlannerOutcome, PlannerRoute, TaskPlanner, planner_route};
use crate::router::{Route, explain};
use crate::state::{ErrorKind, ErrorRecord, Node, RunState, TaskStatus};
use crate::verifier::TaskVerifier;

/// Start a new run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub objective: String,
    pub user_id: UserId,
    /// Generated when absent.
    pub thread_id: Option<ThreadId>,
}

impl RunRequest {
    pub fn new(objective: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            objective: objective.into(),
            user_id: user_id.into(),
            thread_id: None,
        }
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The planner declared the objective met.
    Completed,
    /// An unrecoverable run-level error.
    Error,
    /// A retryable failure kept recurring until the retry ceiling.
    RetryLimit,
    TransitionLimit,
    /// A skip directive named no known phase.
    Directive,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::Completed => "completed",
            TerminationReason::Error => "error",
            TerminationReason::RetryLimit => "retry_limit",
            TerminationReason::TransitionLimit => "transition_limit",
            TerminationReason::Directive => "directive",
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Termination {
    pub reason: TerminationReason,
    pub message: String,
    pub error: Option<ErrorRecord>,
}

/// Everything needed to resume a thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: ThreadId,
    pub agent_config: AgentConfig,
    pub user_id: UserId,
    pub user_request: String,
    pub run_state: RunState,
    pub transitions: u32,
    /// Set once the run has ended.
    pub termination: Option<Termination>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    fn context(&self) -> RunContext {
        RunContext {
            thread_id: self.thread_id.clone(),
            user_id: self.user_id.clone(),
            objective: self.user_request.clone(),
            agent: self.agent_config.clone(),
        }
    }

    fn outcome(&self, termination: Termination) -> RunOutcome {
        RunOutcome {
            thread_id: self.thread_id.clone(),
            termination,
            state: self.run_state.clone(),
            transitions: self.transitions,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub thread_id: ThreadId,
    pub termination: Termination,
    pub state: RunState,
    pub transitions: u32,
}

/// What changed during a phase, for event publishing.
struct Observed {
    tasks: usize,
    active: Option<TaskId>,
    steps: usize,
    status: Option<TaskStatus>,
    consolidated: bool,
    retry: u32,
}

impl Observed {
    fn of(state: &RunState) -> Self {
        let task = state.active_task();
        Self {
            tasks: state.tasks.len(),
            active: state.active_task_id,
            steps: task.map_or(0, |t| t.steps.len()),
            status: task.map(|t| t.status),
            consolidated: task.is_some_and(|t| t.consolidated),
            retry: state.retry,
        }
    }
}

/// Drives runs through plan, execute, verify and consolidate until the
/// router says stop.
///
/// Runs on distinct threads may execute concurrently on one orchestrator.
pub struct Orchestrator {
    llm: Arc<dyn LlmProvider>,
    planner: TaskPlanner,
    verifier: TaskVerifier,
    executor: Arc<dyn TaskExecutor>,
    consolidator: Arc<dyn MemoryConsolidator>,
    checkpoints: Arc<dyn CheckpointStore>,
    config: OrchestratorConfig,
    agent: AgentConfig,
    short_term_memory_size: i64,
    events: EventBus,
    usage: UsageMeter,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        executor: Arc<dyn TaskExecutor>,
        consolidator: Arc<dyn MemoryConsolidator>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: &CadenceConfig,
    ) -> Self {
        let usage = UsageMeter::new();
        Self {
            planner: TaskPlanner::new(llm.clone(), usage.clone()),
            verifier: TaskVerifier::new(llm.clone(), usage.clone()),
            llm,
            executor,
            consolidator,
            checkpoints,
            config: config.orchestrator.clone(),
            agent: config.agent.clone(),
            short_term_memory_size: config.memory.size_limits.short_term_memory_size,
            events: EventBus::default(),
            usage,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Share a usage meter with other components (the executor, the CLI).
    pub fn with_usage_meter(mut self, usage: UsageMeter) -> Self {
        self.planner = TaskPlanner::new(self.llm.clone(), usage.clone());
        self.verifier = TaskVerifier::new(self.llm.clone(), usage.clone());
        self.usage = usage;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn usage(&self) -> &UsageMeter {
        &self.usage
    }

    /// Start a run on a new thread.
    pub async fn run(&self, request: RunRequest) -> Result<RunOutcome> {
        let memory_limit = self.memory_limit()?;
        let thread_id = request.thread_id.unwrap_or_else(new_thread_id);
        if self.checkpoints.load(&thread_id).await?.is_some() {
            return Err(CadenceError::Orchestration(format!(
                "thread '{thread_id}' already exists; resume it instead"
            )));
        }

        let mut checkpoint = Checkpoint {
            thread_id: thread_id.clone(),
            agent_config: self.agent.clone(),
            user_id: request.user_id,
            run_state: RunState::new(&request.objective),
            user_request: request.objective,
            transitions: 0,
            termination: None,
            updated_at: Utc::now(),
        };
        info!(thread_id = %thread_id, user_id = %checkpoint.user_id, "starting run");
        self.events.publish(Event::RunStarted {
            thread_id,
            objective: checkpoint.user_request.clone(),
        });

        self.drive(&mut checkpoint, Route::TaskPlanner, "start", memory_limit)
            .await
    }

    /// Continue a thread from its latest checkpoint. A thread that already
    /// ended returns its recorded outcome.
    pub async fn resume(&self, thread_id: &str) -> Result<RunOutcome> {
        let memory_limit = self.memory_limit()?;
        let mut checkpoint = self
            .load_checkpoint(thread_id)
            .await?
            .ok_or_else(|| CadenceError::Checkpoint(format!("no checkpoint for thread '{thread_id}'")))?;

        if let Some(termination) = checkpoint.termination.clone() {
            debug!(thread_id, reason = %termination.reason, "thread already terminated");
            return Ok(checkpoint.outcome(termination));
        }

        let last_node = checkpoint.run_state.last_node;
        let (route, rule) = match last_node {
            None => (Route::TaskPlanner, "start"),
            Some(_) => explain(&checkpoint.run_state, &self.config),
        };
        info!(thread_id, ?last_node, route = %route, rule, "resuming run");
        self.events.publish(Event::RunResumed {
            thread_id: thread_id.to_string(),
            last_node: last_node.map(|n| n.as_str().to_string()),
        });

        self.drive(&mut checkpoint, route, rule, memory_limit).await
    }

    pub async fn load_checkpoint(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let Some(record) = self.checkpoints.load(thread_id).await? else {
            return Ok(None);
        };
        serde_json::from_value(record.payload)
            .map(Some)
            .map_err(|e| CadenceError::Checkpoint(format!("corrupt checkpoint for '{thread_id}': {e}")))
    }

    fn memory_limit(&self) -> Result<usize> {
        usize::try_from(self.short_term_memory_size).map_err(|_| CadenceError::ConfigValidation {
            field: "memory.size_limits.short_term_memory_size".into(),
            reason: format!("must be >= 0, got {}", self.short_term_memory_size),
        })
    }

    async fn drive(
        &self,
        checkpoint: &mut Checkpoint,
        mut route: Route,
        mut rule: &'static str,
        memory_limit: usize,
    ) -> Result<RunOutcome> {
        let ctx = checkpoint.context();

        loop {
            if route == Route::End {
                let termination = self.routed_termination(&mut checkpoint.run_state);
                return self.finish(checkpoint, termination).await;
            }
            if checkpoint.transitions >= self.config.max_transitions {
                let error = ErrorRecord::active(
                    ErrorKind::TransitionLimit,
                    "orchestrator",
                    format!("transition limit of {} reached", self.config.max_transitions),
                );
                checkpoint.run_state.error = Some(error.clone());
                let termination = Termination {
                    reason: TerminationReason::TransitionLimit,
                    message: error.message.clone(),
                    error: Some(error),
                };
                return self.finish(checkpoint, termination).await;
            }

            checkpoint.transitions += 1;
            if rule == "skip_validation" {
                checkpoint.run_state.skip_validation = None;
            }
            debug!(
                thread_id = %ctx.thread_id,
                route = %route,
                rule,
                transition = checkpoint.transitions,
                "entering phase"
            );
            self.events.publish(Event::PhaseEntered {
                thread_id: ctx.thread_id.clone(),
                phase: route.as_str().into(),
                rule: rule.into(),
            });

            let before = Observed::of(&checkpoint.run_state);
            let state = &mut checkpoint.run_state;
            let ended = match route {
                Route::TaskPlanner => self.planner_phase(state, &ctx).await,
                Route::TaskExecutor => {
                    self.executor_phase(state, &ctx).await;
                    None
                }
                Route::TaskVerifier => {
                    self.verifier.verify(state, &ctx, &self.config, memory_limit).await;
                    None
                }
                Route::MemoryConsolidator => {
                    self.consolidator_phase(state, &ctx).await;
                    None
                }
                Route::End => None,
            };
            self.publish_changes(&ctx, route, &before, &checkpoint.run_state);
            self.save(checkpoint).await?;

            if let Some(termination) = ended {
                return self.finish(checkpoint, termination).await;
            }
            (route, rule) = explain(&checkpoint.run_state, &self.config);
        }
    }

    /// Runs the planner until it creates a task, gives up, or ends the run.
    async fn planner_phase(&self, state: &mut RunState, ctx: &RunContext) -> Option<Termination> {
        loop {
            match self.planner.plan(state, ctx, &self.config).await {
                PlannerOutcome::Created(_) => return None,
                PlannerOutcome::End { summary } => {
                    return Some(Termination {
                        reason: TerminationReason::Completed,
                        message: summary,
                        error: None,
                    });
                }
                PlannerOutcome::NoTask => {}
            }

            match planner_route(state, &self.config) {
                PlannerRoute::Retry => {
                    debug!(thread_id = %ctx.thread_id, retry = state.retry, "re-planning");
                    self.events.publish(Event::RetryScheduled {
                        thread_id: ctx.thread_id.clone(),
                        source: Node::TaskPlanner.as_str().into(),
                        retry: state.retry,
                    });
                }
                PlannerRoute::End => return Some(self.routed_termination(state)),
                PlannerRoute::Exit => return None,
            }
        }
    }

    async fn executor_phase(&self, state: &mut RunState, ctx: &RunContext) {
        state.last_node = Some(Node::TaskExecutor);
        let Some(task) = state
            .active_task()
            .filter(|t| t.status == TaskStatus::Pending)
            .cloned()
        else {
            warn!(thread_id = %ctx.thread_id, "no pending task to execute");
            return;
        };

        let step_number = task.steps.len() as u32 + 1;
        match self.executor.run(&task, step_number, state).await {
            Ok(outcome) => self.apply_step(state, outcome),
            Err(e) => {
                warn!(thread_id = %ctx.thread_id, task_id = %task.id, error = %e, "task execution failed");
                state.fail(ErrorKind::ExecutionError, "task_executor", e.to_string());
            }
        }
    }

    fn apply_step(&self, state: &mut RunState, outcome: StepOutcome) {
        let StepOutcome {
            status,
            step,
            message,
            tool_results,
            skip_to,
        } = outcome;
        let Some(task_id) = state.active_task_id else {
            return;
        };

        if let Some(text) = message {
            state
                .log(Role::Assistant, "task_executor", text)
                .metadata
                .insert("task_id".into(), task_id.to_string().into());
        }
        for result in tool_results {
            let mut msg = Message::text(Role::Tool, "");
            msg.content = vec![MessageContent::ToolResult {
                tool_call_id: result.tool_call_id,
                content: result.content,
                is_error: result.is_error,
            }];
            state.messages.push(msg);
        }

        let blocked_reason = step
            .result
            .clone()
            .or_else(|| step.message.clone())
            .unwrap_or_else(|| "no reason given".into());
        let Some(task) = state.active_task_mut() else {
            return;
        };
        task.steps.push(step);
        let directive = task.directive.clone();
        match status {
            ExecutionStatus::Completed => {}
            ExecutionStatus::AwaitingVerification | ExecutionStatus::Failed => {
                task.status = TaskStatus::AwaitingVerification;
            }
            ExecutionStatus::Blocked => {
                state.bump_retry(self.config.max_retries);
                state.fail(
                    ErrorKind::BlockedTask,
                    "task_executor",
                    format!("task '{directive}' is blocked: {blocked_reason}"),
                );
            }
        }

        if let Some(target) = skip_to {
            debug!(task_id = %task_id, target, "executor requested a skip");
            state.skip_validation = Some(target);
        }
    }

    async fn consolidator_phase(&self, state: &mut RunState, ctx: &RunContext) {
        state.last_node = Some(Node::MemoryConsolidator);
        if let Err(e) = self.consolidator.consolidate(state, ctx).await {
            warn!(thread_id = %ctx.thread_id, error = %e, "memory consolidation failed");
            state.fail(ErrorKind::StoreError, "memory_consolidator", e.to_string());
        }
    }

    /// Why the router (or the planner's local router) chose to end the run.
    fn routed_termination(&self, state: &mut RunState) -> Termination {
        let Some(error) = state.active_error().cloned() else {
            let message = match state.skip_validation.take() {
                Some(target) => format!("unknown phase '{target}' requested"),
                None => "run ended".to_string(),
            };
            return Termination {
                reason: TerminationReason::Directive,
                message,
                error: None,
            };
        };

        if error.kind.consumes_retry() && state.retry >= self.config.max_retries {
            Termination {
                reason: TerminationReason::RetryLimit,
                message: format!(
                    "retry limit of {} reached: {}",
                    self.config.max_retries, error.message
                ),
                error: Some(error),
            }
        } else {
            Termination {
                reason: TerminationReason::Error,
                message: error.message.clone(),
                error: Some(error),
            }
        }
    }

    async fn finish(&self, checkpoint: &mut Checkpoint, termination: Termination) -> Result<RunOutcome> {
        checkpoint.run_state.log(
            Role::System,
            "orchestrator",
            format!("[terminated:{}] {}", termination.reason, termination.message),
        );
        checkpoint.termination = Some(termination.clone());
        self.save(checkpoint).await?;

        info!(
            thread_id = %checkpoint.thread_id,
            reason = %termination.reason,
            transitions = checkpoint.transitions,
            tasks = checkpoint.run_state.tasks.len(),
            "run terminated"
        );
        self.events.publish(Event::RunTerminated {
            thread_id: checkpoint.thread_id.clone(),
            reason: termination.reason.as_str().into(),
            message: termination.message.clone(),
        });
        Ok(checkpoint.outcome(termination))
    }

    async fn save(&self, checkpoint: &mut Checkpoint) -> Result<()> {
        checkpoint.updated_at = Utc::now();
        let record = CheckpointRecord {
            thread_id: checkpoint.thread_id.clone(),
            payload: serde_json::to_value(&*checkpoint)?,
            updated_at: checkpoint.updated_at,
        };
        self.checkpoints.save(&record).await?;
        self.events.publish(Event::CheckpointSaved {
            thread_id: checkpoint.thread_id.clone(),
            transitions: checkpoint.transitions,
        });
        Ok(())
    }

    fn publish_changes(&self, ctx: &RunContext, route: Route, before: &Observed, state: &RunState) {
        let thread_id = &ctx.thread_id;

        for task in state.tasks.iter().skip(before.tasks) {
            self.events.publish(Event::TaskCreated {
                thread_id: thread_id.clone(),
                task_id: task.id,
                directive: task.directive.clone(),
            });
        }

        if route != Route::TaskPlanner && state.retry > before.retry {
            self.events.publish(Event::RetryScheduled {
                thread_id: thread_id.clone(),
                source: route.as_str().into(),
                retry: state.retry,
            });
        }

        let Some(task) = state.active_task() else {
            return;
        };
        let same_task = before.active == Some(task.id);

        if let Some(step) = task.steps.last()
            && (!same_task || task.steps.len() > before.steps)
        {
            self.events.publish(Event::StepRecorded {
                thread_id: thread_id.clone(),
                task_id: task.id,
                step: step.number,
                status: step.status.as_str().into(),
            });
        }

        if route == Route::TaskVerifier
            && task.status.is_finished()
            && before.status != Some(task.status)
        {
            self.events.publish(Event::TaskVerified {
                thread_id: thread_id.clone(),
                task_id: task.id,
                accepted: task.status == TaskStatus::Completed,
                confidence: task.confidence.unwrap_or(0),
            });
        }

        if task.consolidated && !(same_task && before.consolidated) {
            self.events.publish(Event::MemoryConsolidated {
                thread_id: thread_id.clone(),
                task_id: task.id,
            });
        }

    }
}
