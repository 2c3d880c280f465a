//! Mock providers for deterministic testing.
//!
//! Return pre-configured responses without making any HTTP calls.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::embedding::EmbeddingProvider;
use crate::provider::*;
use cadence_core::{CadenceError, Message, MessageContent, Result, Role, ToolCall};

/// A mock LLM provider that replays queued responses in order. Both
/// `complete` and `complete_structured` draw from the same queue.
///
/// # Example
/// ```
/// use cadence_llm::mock::MockProvider;
/// let provider = MockProvider::new("test")
///     .with_tool_call("create_task", serde_json::json!({"directive": "research X"}));
/// ```
pub struct MockProvider {
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    requests: Arc<Mutex<Vec<LlmRequest>>>,
    structured_requests: Arc<Mutex<Vec<StructuredRequest>>>,
    name: String,
}

/// A pre-configured response from the mock provider.
#[derive(Clone)]
pub struct MockResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    /// Value returned by `complete_structured`.
    pub structured: Option<serde_json::Value>,
    pub stop_reason: StopReason,
    pub usage: Usage,
    /// If set, the provider will return this error instead.
    pub error: Option<String>,
    /// HTTP status attached to `error`, reported as `LlmStatus`.
    pub status: Option<u16>,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            text: String::new(),
            tool_calls: vec![],
            structured: None,
            stop_reason: StopReason::EndTurn,
            usage: Usage {
                input_tokens: 100,
                output_tokens: 50,
                estimated_cost_usd: 0.001,
            },
            error: None,
            status: None,
        }
    }
}

impl MockResponse {
    /// Create a text response.
    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Default::default()
        }
    }

    /// Create a response calling each `(name, arguments)` pair.
    pub fn tool_calls(calls: Vec<(&str, serde_json::Value)>) -> Self {
        Self {
            tool_calls: calls
                .into_iter()
                .enumerate()
                .map(|(i, (name, arguments))| ToolCall {
                    id: format!("call_{i}_{}", uuid::Uuid::new_v4().simple()),
                    tool_name: name.to_string(),
                    arguments,
                })
                .collect(),
            stop_reason: StopReason::ToolUse,
            ..Default::default()
        }
    }

    /// Create a structured-output response.
    pub fn structured(value: serde_json::Value) -> Self {
        Self {
            structured: Some(value),
            ..Default::default()
        }
    }

    /// Create an error response.
    pub fn error(msg: &str) -> Self {
        Self {
            error: Some(msg.to_string()),
            ..Default::default()
        }
    }

    /// Create an HTTP status error response.
    pub fn status(status: u16, msg: &str) -> Self {
        Self {
            status: Some(status),
            ..Self::error(msg)
        }
    }

    fn take_error(&mut self) -> Option<CadenceError> {
        let message = self.error.take()?;
        Some(match self.status {
            Some(status) => CadenceError::LlmStatus { status, message },
            None => CadenceError::LlmProvider(message),
        })
    }
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(vec![])),
            structured_requests: Arc::new(Mutex::new(vec![])),
            name: name.into(),
        }
    }

    /// Queue a simple text response.
    pub fn with_response(self, text: &str) -> Self {
        self.with_mock_response(MockResponse::text(text))
    }

    /// Queue a single tool call response.
    pub fn with_tool_call(self, name: &str, args: serde_json::Value) -> Self {
        self.with_mock_response(MockResponse::tool_calls(vec![(name, args)]))
    }

    /// Queue a structured-output response.
    pub fn with_structured(self, value: serde_json::Value) -> Self {
        self.with_mock_response(MockResponse::structured(value))
    }

    /// Queue an error response.
    pub fn with_error(self, error: &str) -> Self {
        self.with_mock_response(MockResponse::error(error))
    }

    /// Queue an HTTP status error response.
    pub fn with_status_error(self, status: u16, error: &str) -> Self {
        self.with_mock_response(MockResponse::status(status, error))
    }

    /// Queue a fully custom response.
    pub fn with_mock_response(self, resp: MockResponse) -> Self {
        self.responses.lock().push_back(resp);
        self
    }

    /// Queue a response through a shared reference.
    pub fn queue_response(&self, resp: MockResponse) {
        self.responses.lock().push_back(resp);
    }

    /// Chat requests received so far.
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().clone()
    }

    /// Structured requests received so far.
    pub fn recorded_structured(&self) -> Vec<StructuredRequest> {
        self.structured_requests.lock().clone()
    }

    /// Responses still queued.
    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }

    fn next_response(&self) -> Option<MockResponse> {
        self.responses.lock().pop_front()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn models(&self) -> Vec<String> {
        vec!["mock/test-model".to_string()]
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        self.requests.lock().push(request.clone());
        let mut mock = self
            .next_response()
            .unwrap_or_else(|| MockResponse::text("(mock: no more queued responses)"));

        if let Some(error) = mock.take_error() {
            return Err(error);
        }

        let mut msg = Message::text(Role::Assistant, "");
        msg.content = if mock.text.is_empty() {
            vec![]
        } else {
            vec![MessageContent::Text { text: mock.text }]
        };
        let has_tool_calls = !mock.tool_calls.is_empty();
        msg.tool_calls = mock.tool_calls;

        Ok(LlmResponse {
            message: msg,
            usage: mock.usage,
            has_tool_calls,
            stop_reason: mock.stop_reason,
        })
    }

    async fn complete_structured(&self, request: &StructuredRequest) -> Result<StructuredResponse> {
        self.structured_requests.lock().push(request.clone());
        let Some(mut mock) = self.next_response() else {
            return Err(CadenceError::LlmProvider("mock: no more queued responses".into()));
        };

        if let Some(error) = mock.take_error() {
            return Err(error);
        }

        match mock.structured {
            Some(value) => Ok(StructuredResponse {
                value,
                usage: mock.usage,
            }),
            None => Err(CadenceError::SchemaMismatch {
                schema: request.schema_name.clone(),
                reason: "mock response carried no structured value".into(),
            }),
        }
    }
}

/// Deterministic bag-of-words embedder. Texts sharing words get similar
/// vectors, which is enough to exercise similarity search in tests.
pub struct MockEmbedding {
    dims: usize,
    fail_next: AtomicUsize,
    empty_output: bool,
    calls: AtomicUsize,
}

impl MockEmbedding {
    pub fn new(dims: usize) -> Self {
        Self {
            dims: dims.max(1),
            fail_next: AtomicUsize::new(0),
            empty_output: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail the next `n` calls with an embedding error.
    pub fn failing_first(self, n: usize) -> Self {
        self.fail_next.store(n, Ordering::SeqCst);
        self
    }

    /// Return empty vectors for every input.
    pub fn with_empty_output(mut self) -> Self {
        self.empty_output = true;
        self
    }

    /// Number of `embed` calls made.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Embed a single text synchronously.
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let bucket = (fnv1a(&word.to_lowercase()) % self.dims as u64) as usize;
            v[bucket] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedding {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(CadenceError::Embedding("mock embedding failure".into()));
        }
        if self.empty_output {
            return Ok(texts.iter().map(|_| Vec::new()).collect());
        }
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        "mock"
    }
}

fn fnv1a(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in s.bytes() {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}
