use async_trait::async_trait;
use cadence_core::{Message, Result, Tool};
use serde::{Deserialize, Serialize};

/// A request to an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// The model to use, e.g. "openai/gpt-4o-mini". Routers strip the prefix.
    pub model: String,
    /// Conversation history.
    pub messages: Vec<Message>,
    /// Actions the model may call.
    pub tools: Vec<Tool>,
    /// Force the model to call one of `tools` instead of answering in text.
    pub require_tool: bool,
    /// System prompt (separate from messages for providers that support it).
    pub system: Option<String>,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Temperature.
    pub temperature: f32,
}

impl LlmRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: vec![],
            tools: vec![],
            require_tool: false,
            system: None,
            max_tokens: 4096,
            temperature: 0.2,
        }
    }
}

/// A complete response from an LLM.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub message: Message,
    pub usage: Usage,
    /// Whether the model called any tools.
    pub has_tool_calls: bool,
    pub stop_reason: StopReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    ContentFilter,
}

/// A request whose answer must be a JSON object matching `schema`.
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub system: Option<String>,
    /// Name reported to the provider, e.g. "task_verification".
    pub schema_name: String,
    /// JSON Schema of the expected object.
    pub schema: serde_json::Value,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone)]
pub struct StructuredResponse {
    pub value: serde_json::Value,
    pub usage: Usage,
}

impl StructuredResponse {
    /// Deserialize the value into a concrete type, reporting a schema mismatch
    /// on failure.
    pub fn parse<T: serde::de::DeserializeOwned>(&self, schema_name: &str) -> Result<T> {
        serde_json::from_value(self.value.clone()).map_err(|e| {
            cadence_core::CadenceError::SchemaMismatch {
                schema: schema_name.to_string(),
                reason: e.to_string(),
            }
        })
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Estimated cost in USD (computed by the provider adapter).
    pub estimated_cost_usd: f64,
}

impl Usage {
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    pub fn merge(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.estimated_cost_usd += other.estimated_cost_usd;
    }
}

/// Trait implemented by each model provider.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Human-readable name, e.g. "openai".
    fn name(&self) -> &str;

    /// Known models.
    fn models(&self) -> Vec<String>;

    /// Send a chat request, optionally with callable actions.
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse>;

    /// Send a request whose answer is a JSON object conforming to a schema.
    async fn complete_structured(&self, request: &StructuredRequest) -> Result<StructuredResponse>;
}
