//! Task verification.
//!
//! One invocation walks VERIFY, then SUCCESS or FAILURE, then UPDATE. Each
//! stage stamps `last_node` so a checkpoint taken mid-way resumes correctly.

use cadence_config::OrchestratorConfig;
use cadence_core::{Message, Role, TaskId};
use cadence_llm::{LlmProvider, StructuredRequest, UsageMeter};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::state::{ErrorKind, ErrorRecord, MemoryNote, Node, RunState, TaskStatus};

const SOURCE: &str = "task_verifier";
const SCHEMA_NAME: &str = "task_verification";

/// The model's judgement of one task.
#[derive(Debug, Clone, Deserialize)]
pub struct Verdict {
    pub is_complete: bool,
    /// 0-100.
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub missing_elements: Vec<String>,
    #[serde(default)]
    pub next_actions: Vec<String>,
}

impl Verdict {
    /// Confidence clamped into 0..=100 and rounded, as recorded on the task.
    pub fn score(&self) -> u8 {
        if self.confidence.is_nan() {
            return 0;
        }
        self.confidence.clamp(0.0, 100.0).round() as u8
    }

    /// Compares the unrounded confidence; 69.6 does not meet a threshold of 70.
    pub fn accepted(&self, threshold: u8) -> bool {
        self.is_complete
            && !self.confidence.is_nan()
            && self.confidence.clamp(0.0, 100.0) >= f64::from(threshold)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifierOutcome {
    /// The active task was not awaiting verification.
    Skipped,
    Accepted { task_id: TaskId, confidence: u8 },
    Rejected { task_id: TaskId, confidence: u8 },
    /// The verification call itself failed; see `RunState::error`.
    Failed,
}

pub fn verdict_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "is_complete": {"type": "boolean"},
            "confidence": {"type": "number", "description": "0 to 100"},
            "reasoning": {"type": "string"},
            "missing_elements": {"type": "array", "items": {"type": "string"}},
            "next_actions": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["is_complete", "confidence", "reasoning", "missing_elements", "next_actions"],
        "additionalProperties": false
    })
}

pub struct TaskVerifier {
    llm: Arc<dyn LlmProvider>,
    usage: UsageMeter,
}

impl TaskVerifier {
    pub fn new(llm: Arc<dyn LlmProvider>, usage: UsageMeter) -> Self {
        Self { llm, usage }
    }

    /// Judge the active task. `memory_limit` bounds short-term memory (0 = no limit).
    pub async fn verify(
        &self,
        state: &mut RunState,
        ctx: &RunContext,
        config: &OrchestratorConfig,
        memory_limit: usize,
    ) -> VerifierOutcome {
        state.last_node = Some(Node::VerifyTask);

        let Some(task) = state
            .active_task()
            .filter(|t| t.status == TaskStatus::AwaitingVerification)
        else {
            debug!(thread_id = %ctx.thread_id, "nothing awaiting verification");
            return VerifierOutcome::Skipped;
        };
        let task_id = task.id;
        let directive = task.directive.clone();

        let request = StructuredRequest {
            model: ctx.agent.model.clone(),
            messages: vec![Message::text(Role::User, build_prompt(state, ctx))],
            system: Some(
                "You review whether a task was actually accomplished. Judge only the \
                 recorded execution history against the directive; do not assume work \
                 that is not shown. Confidence is 0-100."
                    .into(),
            ),
            schema_name: SCHEMA_NAME.into(),
            schema: verdict_schema(),
            max_tokens: ctx.agent.max_tokens,
            temperature: 0.0,
        };

        let verdict = match self.llm.complete_structured(&request).await {
            Ok(response) => {
                self.usage.record(SOURCE, &response.usage);
                response.parse::<Verdict>(SCHEMA_NAME)
            }
            Err(e) => Err(e),
        };
        let verdict = match verdict {
            Ok(v) => v,
            Err(e) => {
                warn!(thread_id = %ctx.thread_id, task_id = %task_id, error = %e, "verification failed");
                state.fail(ErrorKind::VerifierError, SOURCE, e.to_string());
                return VerifierOutcome::Failed;
            }
        };

        let confidence = verdict.score();
        let accepted = verdict.accepted(config.verification_threshold);
        let mut note = verdict.reasoning.trim().to_string();
        if !accepted && !verdict.missing_elements.is_empty() {
            note.push_str(&format!(" Missing: {}.", verdict.missing_elements.join("; ")));
        }

        if let Some(task) = state.active_task_mut() {
            task.status = if accepted {
                TaskStatus::Completed
            } else {
                TaskStatus::Failed
            };
            task.verification = Some(note.clone());
            task.confidence = Some(confidence);
        }

        let record = if accepted {
            handle_success(state, task_id, &directive, confidence, &note)
        } else {
            handle_failure(state, config, task_id, &directive, confidence, &note, &verdict.next_actions)
        };

        // UPDATE
        state.last_node = Some(Node::UpdateTask);
        state.remember(
            MemoryNote {
                task_id: Some(task_id),
                kind: "verification".into(),
                content: record,
                timestamp: Utc::now(),
            },
            memory_limit,
        );

        info!(thread_id = %ctx.thread_id, task_id = %task_id, accepted, confidence, "task verified");
        if accepted {
            VerifierOutcome::Accepted { task_id, confidence }
        } else {
            VerifierOutcome::Rejected { task_id, confidence }
        }
    }
}

fn handle_success(
    state: &mut RunState,
    task_id: TaskId,
    directive: &str,
    confidence: u8,
    note: &str,
) -> String {
    state.last_node = Some(Node::HandleSuccess);
    let record = format!("[verification:success] {directive} (confidence {confidence}): {note}");
    state
        .log(Role::System, SOURCE, record.clone())
        .metadata
        .extend([
            ("branch".to_string(), json!("success")),
            ("task_id".to_string(), json!(task_id.to_string())),
        ]);
    state.retry = 0;
    if state.error.as_ref().is_some_and(|e| !e.active) {
        state.error = None;
    }
    record
}

fn handle_failure(
    state: &mut RunState,
    config: &OrchestratorConfig,
    task_id: TaskId,
    directive: &str,
    confidence: u8,
    note: &str,
    next_actions: &[String],
) -> String {
    state.last_node = Some(Node::HandleFailure);
    let mut record = format!("[verification:failure] {directive} (confidence {confidence}): {note}");
    if !next_actions.is_empty() {
        record.push_str(&format!(" Next: {}.", next_actions.join("; ")));
    }
    state
        .log(Role::System, SOURCE, record.clone())
        .metadata
        .extend([
            ("branch".to_string(), json!("failure")),
            ("task_id".to_string(), json!(task_id.to_string())),
        ]);

    let retry = state.bump_retry(config.max_retries);
    let message = format!("task '{directive}' failed verification: {note}");
    state.error = Some(if retry >= config.max_retries {
        warn!(task_id = %task_id, retry, "verification retry ceiling reached");
        ErrorRecord::active(ErrorKind::ValidationError, SOURCE, message)
    } else {
        ErrorRecord::informational(ErrorKind::ValidationError, SOURCE, message)
    });
    record
}

fn build_prompt(state: &RunState, ctx: &RunContext) -> String {
    let Some(task) = state.active_task() else {
        return String::new();
    };
    let history = serde_json::to_string_pretty(&task.steps).unwrap_or_else(|_| "[]".into());
    let reasoning = if task.reasoning.is_empty() {
        "(none given)"
    } else {
        task.reasoning.as_str()
    };
    format!(
        "Objective: {}\n\nTask directive: {}\nPlanner reasoning: {}\n\nExecution history:\n{}",
        ctx.objective, task.directive, reasoning, history
    )
}
