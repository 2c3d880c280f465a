use cadence_core::{Message, Role, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The phase (or verifier sub-stage) that last touched the run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    TaskPlanner,
    TaskExecutor,
    VerifyTask,
    HandleSuccess,
    HandleFailure,
    UpdateTask,
    MemoryConsolidator,
}

impl Node {
    pub fn as_str(&self) -> &'static str {
        match self {
            Node::TaskPlanner => "task_planner",
            Node::TaskExecutor => "task_executor",
            Node::VerifyTask => "verify_task",
            Node::HandleSuccess => "handle_success",
            Node::HandleFailure => "handle_failure",
            Node::UpdateTask => "update_task",
            Node::MemoryConsolidator => "memory_consolidator",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    AwaitingVerification,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Completed or failed.
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::AwaitingVerification => "awaiting_verification",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

/// One unit of work created by the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub directive: String,
    /// Why the planner chose this task.
    pub reasoning: String,
    pub steps: Vec<Step>,
    pub status: TaskStatus,
    /// Verifier reasoning, recorded on acceptance and rejection alike.
    pub verification: Option<String>,
    /// Verifier confidence (0-100) of the last verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u8>,
    /// Set once the outcome has been written to durable memory.
    #[serde(default)]
    pub consolidated: bool,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(directive: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            directive: directive.into(),
            reasoning: reasoning.into(),
            steps: Vec::new(),
            status: TaskStatus::Pending,
            verification: None,
            confidence: None,
            consolidated: false,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    ToolInvocation,
    Cognitive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Completed,
    Failed,
    Blocked,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Blocked => "blocked",
        }
    }
}

/// A step in a task's execution history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// 1-based position within the task.
    pub number: u32,
    pub name: String,
    pub description: String,
    pub kind: StepKind,
    #[serde(default)]
    pub tool_invocations: Vec<ToolInvocationRecord>,
    /// What the step said, if anything.
    pub message: Option<String>,
    pub status: StepStatus,
    pub result: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocationRecord {
    pub description: String,
    /// What had to be known before calling the tool.
    pub prerequisite_knowledge: String,
    pub expected_result: String,
    pub result: Option<String>,
    pub metadata: ToolInvocationMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocationMeta {
    pub name: String,
    pub call_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Run-level failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    WrongActionCount,
    UnrecognizedAction,
    TaskAborted,
    ValidationError,
    ManagerError,
    BlockedTask,
    StoreTimeout,
    StoreError,
    VerifierError,
    ExecutionError,
    StepLimitExceeded,
    TransitionLimit,
}

impl ErrorKind {
    /// Failures the run may recover from by trying again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::WrongActionCount | ErrorKind::UnrecognizedAction | ErrorKind::BlockedTask
        )
    }

    /// Failures that advance the global retry counter.
    pub fn consumes_retry(&self) -> bool {
        self.is_retryable() || *self == ErrorKind::ValidationError
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::WrongActionCount => "wrong_action_count",
            ErrorKind::UnrecognizedAction => "unrecognized_action",
            ErrorKind::TaskAborted => "task_aborted",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::ManagerError => "manager_error",
            ErrorKind::BlockedTask => "blocked_task",
            ErrorKind::StoreTimeout => "store_timeout",
            ErrorKind::StoreError => "store_error",
            ErrorKind::VerifierError => "verifier_error",
            ErrorKind::ExecutionError => "execution_error",
            ErrorKind::StepLimitExceeded => "step_limit_exceeded",
            ErrorKind::TransitionLimit => "transition_limit",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single error slot of a run.
///
/// An active record is an unresolved failure the router must act on. An
/// inactive one is only context for the next planning cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    pub active: bool,
    /// Component that raised it ("task_planner", ...).
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn active(kind: ErrorKind, source: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            active: true,
            source: source.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn informational(kind: ErrorKind, source: &str, message: impl Into<String>) -> Self {
        Self {
            active: false,
            ..Self::active(kind, source, message)
        }
    }
}

/// Short-term memory entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryNote {
    pub task_id: Option<TaskId>,
    /// e.g. "verification".
    pub kind: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Everything a run knows. Serialized whole into every checkpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunState {
    pub messages: Vec<Message>,
    pub last_node: Option<Node>,
    pub memories: Vec<MemoryNote>,
    /// Recalled long-term memories, formatted for prompts.
    pub rag_context: String,
    pub tasks: Vec<Task>,
    pub active_task_id: Option<TaskId>,
    pub retry: u32,
    pub step_count: u32,
    /// Route override naming the next phase.
    pub skip_validation: Option<String>,
    pub error: Option<ErrorRecord>,
}

impl RunState {
    /// Fresh state seeded with the user's request.
    pub fn new(objective: &str) -> Self {
        Self {
            messages: vec![Message::text(Role::User, objective)],
            ..Default::default()
        }
    }

    pub fn active_task(&self) -> Option<&Task> {
        let id = self.active_task_id?;
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn active_task_mut(&mut self) -> Option<&mut Task> {
        let id = self.active_task_id?;
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// The error slot, if it holds an unresolved failure.
    pub fn active_error(&self) -> Option<&ErrorRecord> {
        self.error.as_ref().filter(|e| e.active)
    }

    /// Record an unresolved failure.
    pub fn fail(&mut self, kind: ErrorKind, source: &str, message: impl Into<String>) {
        self.error = Some(ErrorRecord::active(kind, source, message));
    }

    /// Advance the retry counter without passing `max_retries`.
    pub fn bump_retry(&mut self, max_retries: u32) -> u32 {
        self.retry = self.retry.saturating_add(1).min(max_retries);
        self.retry
    }

    /// Append a short-term memory note, keeping at most `limit` (0 = no limit).
    pub fn remember(&mut self, note: MemoryNote, limit: usize) {
        self.memories.push(note);
        if limit > 0 && self.memories.len() > limit {
            let excess = self.memories.len() - limit;
            self.memories.drain(..excess);
        }
    }

    /// Log a message produced by a phase.
    pub fn log(&mut self, role: Role, phase: &str, text: impl Into<String>) -> &mut Message {
        self.messages.push(Message::text(role, text).with_meta("phase", phase));
        let last = self.messages.len() - 1;
        &mut self.messages[last]
    }
}
