use async_trait::async_trait;
use cadence_config::AgentConfig;
use cadence_core::{Message, Result, Role, ToolResult};
use cadence_llm::{LlmProvider, LlmRequest, UsageMeter};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

use crate::state::{RunState, Step, StepKind, StepStatus, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// The step finished but the task needs more steps.
    Completed,
    /// The task is ready to be judged.
    AwaitingVerification,
    /// The task cannot proceed as planned.
    Blocked,
    Failed,
}

/// Result of executing one step of a task.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub status: ExecutionStatus,
    pub step: Step,
    /// Text to add to the run log.
    pub message: Option<String>,
    pub tool_results: Vec<ToolResult>,
    /// Phase to jump to next, bypassing normal routing.
    pub skip_to: Option<String>,
}

/// Carries out the active task one step at a time.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn run(&self, task: &Task, step_number: u32, state: &RunState) -> Result<StepOutcome>;
}

/// Executes a task as a single reasoning step and hands it to verification.
pub struct CognitiveExecutor {
    llm: Arc<dyn LlmProvider>,
    agent: AgentConfig,
    usage: UsageMeter,
}

impl CognitiveExecutor {
    pub fn new(llm: Arc<dyn LlmProvider>, agent: AgentConfig, usage: UsageMeter) -> Self {
        Self { llm, agent, usage }
    }

    fn prompt(&self, task: &Task, state: &RunState) -> String {
        let mut prompt = format!("Task: {}\n", task.directive);
        if !task.reasoning.is_empty() {
            let _ = writeln!(prompt, "Why: {}", task.reasoning);
        }

        let notes: Vec<&str> = state
            .memories
            .iter()
            .filter(|n| n.task_id == Some(task.id))
            .map(|n| n.content.as_str())
            .collect();
        if !notes.is_empty() {
            let _ = writeln!(prompt, "\nEarlier feedback on this task:\n{}", notes.join("\n"));
        }

        for step in &task.steps {
            if let Some(ref result) = step.result {
                let _ = writeln!(prompt, "\nStep {} result:\n{}", step.number, result);
            }
        }

        if !state.rag_context.is_empty() {
            let _ = writeln!(prompt, "\nRelevant memories:\n{}", state.rag_context);
        }

        prompt.push_str("\nCarry out the task and report the result in full.");
        prompt
    }
}

#[async_trait]
impl TaskExecutor for CognitiveExecutor {
    async fn run(&self, task: &Task, step_number: u32, state: &RunState) -> Result<StepOutcome> {
        let mut request = LlmRequest::new(self.agent.model.clone());
        request.system = Some(format!("You are {}, {}.", self.agent.name, self.agent.role));
        request.messages = vec![Message::text(Role::User, self.prompt(task, state))];
        request.max_tokens = self.agent.max_tokens;
        request.temperature = self.agent.temperature;

        let response = self.llm.complete(&request).await?;
        self.usage.record("task_executor", &response.usage);

        let text = response.message.text_content().trim().to_string();
        debug!(task_id = %task.id, step_number, chars = text.len(), "executed cognitive step");

        let (status, step_status, result, message) = if text.is_empty() {
            (
                ExecutionStatus::Failed,
                StepStatus::Failed,
                None,
                "model returned no output".to_string(),
            )
        } else {
            (
                ExecutionStatus::AwaitingVerification,
                StepStatus::Completed,
                Some(text.clone()),
                text,
            )
        };

        Ok(StepOutcome {
            status,
            step: Step {
                number: step_number,
                name: "carry_out_directive".into(),
                description: task.directive.clone(),
                kind: StepKind::Cognitive,
                tool_invocations: vec![],
                message: Some(message.clone()),
                status: step_status,
                result,
            },
            message: Some(message),
            tool_results: vec![],
            skip_to: None,
        })
    }
}
