use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration, mapped from `cadence.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    pub agent: AgentConfig,
    pub orchestrator: OrchestratorConfig,
    pub memory: MemoryConfig,
    pub embedding: EmbeddingConfig,
    pub logging: LoggingConfig,
    pub services: ServicesConfig,
}

// ── Agent ──────────────────────────────────────────────────────

/// The agent profile the planner and verifier speak as. Persisted with every
/// checkpoint so a resumed run keeps the profile it started with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Display name of the agent.
    pub name: String,
    /// One-line role description injected into the planner prompt.
    pub role: String,
    /// Extra standing instructions for the planner.
    pub instructions: Option<String>,
    /// Model identifier, e.g. "openai/gpt-4o-mini".
    pub model: String,
    /// Maximum tokens per response.
    pub max_tokens: u32,
    /// Temperature (0.0 - 2.0).
    pub temperature: f32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "cadence".into(),
            role: "an autonomous agent that breaks objectives into verifiable tasks".into(),
            instructions: None,
            model: "openai/gpt-4o-mini".into(),
            max_tokens: 4096,
            temperature: 0.2,
        }
    }
}

// ── Orchestrator ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Global retry ceiling shared by planner retries, blocked tasks and
    /// failed verifications.
    pub max_retries: u32,
    /// Maximum number of tasks the planner may create in one run.
    pub max_steps: u32,
    /// Hard cap on phase transitions per run.
    pub max_transitions: u32,
    /// Minimum verifier confidence (0-100) for a task to be accepted.
    pub verification_threshold: u8,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_steps: 25,
            max_transitions: 200,
            verification_threshold: 70,
        }
    }
}

// ── Memory ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Path to the SQLite database holding memories and checkpoints.
    pub db_path: PathBuf,
    pub size_limits: SizeLimits,
    /// Minimum cosine similarity for recalled memories.
    pub similarity_threshold: f32,
    /// Nearest neighbours requested per recall.
    pub retrieve_limit: usize,
    /// Retry policy for `upsert`.
    pub upsert: StoreRetryConfig,
    /// Retry policy for `retrieve_similar`.
    pub retrieve: StoreRetryConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("cadence.db"),
            size_limits: SizeLimits::default(),
            similarity_threshold: 0.7,
            retrieve_limit: 5,
            upsert: StoreRetryConfig::default(),
            retrieve: StoreRetryConfig::retrieve_defaults(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SizeLimits {
    /// Maximum short-term memory notes kept on the run state. 0 = unbounded.
    /// Signed so that a negative value in the file is reported by
    /// `validate()` instead of failing the parse.
    pub short_term_memory_size: i64,
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self {
            short_term_memory_size: 20,
        }
    }
}

/// Timeout and backoff for one class of store operation.
///
/// A partially specified table is completed from the upsert defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreRetryConfig {
    pub max_retries: u32,
    pub timeout_ms: u64,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for StoreRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout_ms: 5_000,
            base_delay_ms: 1_000,
            max_delay_ms: 5_000,
        }
    }
}

impl StoreRetryConfig {
    pub fn retrieve_defaults() -> Self {
        Self {
            max_retries: 3,
            timeout_ms: 5_000,
            base_delay_ms: 500,
            max_delay_ms: 2_000,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

// ── Embedding ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    /// Output dimensionality. Every stored vector has this length.
    pub dimensions: usize,
    /// OpenAI-compatible endpoint (None = api.openai.com).
    pub base_url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".into(),
            dimensions: 1536,
            base_url: None,
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Services ───────────────────────────────────────────────────

/// External service credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    /// API key for the OpenAI-compatible model and embedding endpoints.
    /// Falls back to the OPENAI_API_KEY environment variable.
    pub openai_api_key: Option<String>,
    /// Base URL for chat completions (None = api.openai.com).
    pub openai_base_url: Option<String>,
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
            WarningSeverity::Info => "info",
        };
        write!(f, "{}: {}: {}", label, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, " ({})", h)?;
        }
        Ok(())
    }
}

impl CadenceConfig {
    /// Validate the config and return a list of warnings.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();
        let mut push = |field: &str, message: String, severity, hint: Option<&str>| {
            warnings.push(ConfigWarning {
                field: field.into(),
                message,
                severity,
                hint: hint.map(String::from),
            });
        };

        // ── Agent ───
        if self.agent.model.is_empty() {
            push(
                "agent.model",
                "model is empty".into(),
                WarningSeverity::Error,
                Some("Set to e.g. 'openai/gpt-4o-mini'"),
            );
        }
        if self.agent.name.trim().is_empty() {
            push("agent.name", "agent name is empty".into(), WarningSeverity::Error, None);
        }
        if !(0.0..=2.0).contains(&self.agent.temperature) {
            push(
                "agent.temperature",
                format!("temperature {} is out of range", self.agent.temperature),
                WarningSeverity::Error,
                Some("Temperature must be between 0.0 and 2.0"),
            );
        }
        if self.agent.max_tokens == 0 {
            push(
                "agent.max_tokens",
                "max_tokens is 0: the model won't produce output".into(),
                WarningSeverity::Error,
                None,
            );
        }

        // ── Orchestrator ───
        if self.orchestrator.max_retries == 0 {
            push(
                "orchestrator.max_retries",
                "max_retries is 0: the first retryable failure ends the run".into(),
                WarningSeverity::Error,
                Some("Set to e.g. 3"),
            );
        }
        if self.orchestrator.max_steps == 0 {
            push(
                "orchestrator.max_steps",
                "max_steps is 0: the planner can never create a task".into(),
                WarningSeverity::Error,
                None,
            );
        }
        if self.orchestrator.max_transitions < 8 {
            push(
                "orchestrator.max_transitions",
                format!("{} transitions cannot complete a single task cycle", self.orchestrator.max_transitions),
                WarningSeverity::Warning,
                Some("A plan/execute/verify cycle needs at least 6 transitions"),
            );
        }
        if self.orchestrator.verification_threshold > 100 {
            push(
                "orchestrator.verification_threshold",
                format!("threshold {} is above 100", self.orchestrator.verification_threshold),
                WarningSeverity::Error,
                Some("Confidence is scored 0-100"),
            );
        }

        // ── Memory ───
        if self.memory.size_limits.short_term_memory_size < 0 {
            push(
                "memory.size_limits.short_term_memory_size",
                format!(
                    "must be a non-negative integer, got {}",
                    self.memory.size_limits.short_term_memory_size
                ),
                WarningSeverity::Error,
                Some("Use 0 for unbounded"),
            );
        }
        if !(0.0..=1.0).contains(&self.memory.similarity_threshold) {
            push(
                "memory.similarity_threshold",
                format!("threshold {} is outside 0.0-1.0", self.memory.similarity_threshold),
                WarningSeverity::Error,
                None,
            );
        }
        if self.memory.retrieve_limit == 0 {
            push(
                "memory.retrieve_limit",
                "retrieve_limit is 0: recall will always be empty".into(),
                WarningSeverity::Warning,
                None,
            );
        }
        for (name, policy) in [("memory.upsert", &self.memory.upsert), ("memory.retrieve", &self.memory.retrieve)] {
            if policy.max_retries == 0 {
                push(
                    &format!("{name}.max_retries"),
                    "must be at least 1".into(),
                    WarningSeverity::Error,
                    None,
                );
            }
            if policy.timeout_ms == 0 {
                push(&format!("{name}.timeout_ms"), "timeout is 0".into(), WarningSeverity::Error, None);
            }
            if policy.base_delay_ms > policy.max_delay_ms {
                push(
                    &format!("{name}.base_delay_ms"),
                    "base delay exceeds the backoff cap".into(),
                    WarningSeverity::Warning,
                    None,
                );
            }
        }

        // ── Embedding ───
        if self.embedding.dimensions == 0 {
            push("embedding.dimensions", "dimensions is 0".into(), WarningSeverity::Error, None);
        }

        // ── Logging ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            push(
                "logging.format",
                format!("unknown log format '{}'", self.logging.format),
                WarningSeverity::Warning,
                Some(&format!("Valid values: {}", valid_formats.join(", "))),
            );
        }
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            push(
                "logging.level",
                format!("unknown log level '{}'", self.logging.level),
                WarningSeverity::Warning,
                Some(&format!("Valid values: {}", valid_levels.join(", "))),
            );
        }

        // ── Services ───
        if self.services.openai_api_key.is_none() && self.agent.model.starts_with("openai/") {
            push(
                "services.openai_api_key",
                "no API key configured for an openai/ model".into(),
                WarningSeverity::Info,
                Some("Set services.openai_api_key or OPENAI_API_KEY"),
            );
        }

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}
