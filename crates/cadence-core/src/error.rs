use thiserror::Error;

/// Unified error type for the Cadence workspace.
///
/// Run-level failures (a planner that picked no action, a task that failed
/// verification) are not errors in this sense; they are recorded on the run
/// state and routed. This type covers infrastructure and configuration.
#[derive(Error, Debug)]
pub enum CadenceError {
    // ── Orchestration ──────────────────────────────────────────
    #[error("orchestration error: {0}")]
    Orchestration(String),

    // ── LLM ────────────────────────────────────────────────────
    #[error("llm provider error: {0}")]
    LlmProvider(String),

    #[error("llm provider returned HTTP {status}: {message}")]
    LlmStatus { status: u16, message: String },

    #[error("llm rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("structured output did not match schema '{schema}': {reason}")]
    SchemaMismatch { schema: String, reason: String },

    #[error("embedding error: {0}")]
    Embedding(String),

    // ── Memory / storage ───────────────────────────────────────
    #[error("memory error: {0}")]
    Memory(String),

    #[error("store operation '{operation}' timed out after {timeout_ms}ms")]
    StoreTimeout { operation: String, timeout_ms: u64 },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    // ── Config ─────────────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("config validation failed: {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CadenceError {
    /// Whether a retry of the same operation could plausibly succeed.
    ///
    /// Validation and configuration problems are deterministic and never retried.
    /// HTTP statuses are transient only for 429 and 5xx.
    pub fn is_transient(&self) -> bool {
        if let CadenceError::LlmStatus { status, .. } = self {
            return *status == 429 || *status >= 500;
        }
        !matches!(
            self,
            CadenceError::Validation(_)
                | CadenceError::Config(_)
                | CadenceError::ConfigValidation { .. }
                | CadenceError::SchemaMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CadenceError>;
