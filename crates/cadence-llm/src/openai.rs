use async_trait::async_trait;
use cadence_core::{CadenceError, Message, MessageContent, Result, Role, ToolCall};
use serde_json::{Value, json};
use tracing::debug;

use crate::provider::*;

/// OpenAI-compatible chat completions provider (OpenAI, Azure, vLLM, etc.)
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    provider_name: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: "https://api.openai.com/v1".into(),
            provider_name: "openai".into(),
        }
    }

    /// Use a custom base URL, keeping the "openai" prefix for routing.
    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    async fn post(&self, body: &Value) -> Result<Value> {
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| CadenceError::LlmProvider(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 429 {
            let retry_after_secs = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(CadenceError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(CadenceError::LlmStatus {
                status: status.as_u16(),
                message: text,
            });
        }

        resp.json()
            .await
            .map_err(|e| CadenceError::LlmProvider(e.to_string()))
    }

    fn base_body(&self, model: &str, system: Option<&str>, messages: &[Message], max_tokens: u32, temperature: f32) -> Value {
        let mut body = json!({
            "model": model,
            "temperature": temperature,
            "messages": wire_messages(system, messages),
        });
        // Reasoning models only accept max_completion_tokens.
        if uses_max_completion_tokens(model) {
            body["max_completion_tokens"] = json!(max_tokens);
        } else {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    fn models(&self) -> Vec<String> {
        vec![
            "gpt-4o".into(),
            "gpt-4o-mini".into(),
            "gpt-4.1".into(),
            "gpt-4.1-mini".into(),
            "o3-mini".into(),
        ]
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let mut body = self.base_body(
            &request.model,
            request.system.as_deref(),
            &request.messages,
            request.max_tokens,
            request.temperature,
        );

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = json!(tools);
            if request.require_tool {
                body["tool_choice"] = json!("required");
            }
        }

        debug!(model = %request.model, tools = request.tools.len(), "chat completion");
        let data = self.post(&body).await?;

        let choice = &data["choices"][0];
        let content = choice["message"]["content"].as_str().unwrap_or("").to_string();

        let tool_calls: Vec<ToolCall> = choice["message"]["tool_calls"]
            .as_array()
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|c| {
                        Some(ToolCall {
                            id: c["id"].as_str()?.to_string(),
                            tool_name: c["function"]["name"].as_str()?.to_string(),
                            arguments: serde_json::from_str(
                                c["function"]["arguments"].as_str().unwrap_or("{}"),
                            )
                            .unwrap_or_default(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let has_tool_calls = !tool_calls.is_empty();
        let mut message = Message::text(Role::Assistant, content);
        message.tool_calls = tool_calls;

        let stop_reason = match choice["finish_reason"].as_str().unwrap_or("") {
            "length" => StopReason::MaxTokens,
            "content_filter" => StopReason::ContentFilter,
            _ if has_tool_calls => StopReason::ToolUse,
            _ => StopReason::EndTurn,
        };

        Ok(LlmResponse {
            message,
            usage: usage_from(&request.model, &data["usage"]),
            has_tool_calls,
            stop_reason,
        })
    }

    async fn complete_structured(&self, request: &StructuredRequest) -> Result<StructuredResponse> {
        let mut body = self.base_body(
            &request.model,
            request.system.as_deref(),
            &request.messages,
            request.max_tokens,
            request.temperature,
        );
        body["response_format"] = json!({
            "type": "json_schema",
            "json_schema": {
                "name": request.schema_name,
                "schema": request.schema,
                "strict": true,
            }
        });

        debug!(model = %request.model, schema = %request.schema_name, "structured completion");
        let data = self.post(&body).await?;

        let content = data["choices"][0]["message"]["content"].as_str().unwrap_or("");
        let value: Value = serde_json::from_str(content).map_err(|e| CadenceError::SchemaMismatch {
            schema: request.schema_name.clone(),
            reason: format!("response is not JSON: {e}"),
        })?;
        if !value.is_object() {
            return Err(CadenceError::SchemaMismatch {
                schema: request.schema_name.clone(),
                reason: "response is not a JSON object".into(),
            });
        }

        Ok(StructuredResponse {
            value,
            usage: usage_from(&request.model, &data["usage"]),
        })
    }
}

/// Convert the message log to the chat-completions wire format.
fn wire_messages(system: Option<&str>, messages: &[Message]) -> Vec<Value> {
    let mut out = Vec::with_capacity(messages.len() + 1);

    if let Some(system) = system {
        out.push(json!({ "role": "system", "content": system }));
    }

    for msg in messages {
        match msg.role {
            Role::System => out.push(json!({ "role": "system", "content": msg.text_content() })),
            Role::User => out.push(json!({ "role": "user", "content": msg.text_content() })),
            Role::Assistant if msg.tool_calls.is_empty() => {
                out.push(json!({ "role": "assistant", "content": msg.text_content() }))
            }
            Role::Assistant => {
                let calls: Vec<Value> = msg
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.tool_name,
                                "arguments": tc.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
                let text = msg.text_content();
                let content = if text.is_empty() { Value::Null } else { json!(text) };
                out.push(json!({ "role": "assistant", "content": content, "tool_calls": calls }));
            }
            Role::Tool => {
                let mut any = false;
                for block in &msg.content {
                    if let MessageContent::ToolResult { tool_call_id, content, .. } = block {
                        any = true;
                        out.push(json!({
                            "role": "tool",
                            "tool_call_id": tool_call_id,
                            "content": content,
                        }));
                    }
                }
                // Tool messages without a call id would be rejected by the API.
                if !any {
                    out.push(json!({ "role": "user", "content": msg.text_content() }));
                }
            }
        }
    }

    out
}

fn usage_from(model: &str, usage: &Value) -> Usage {
    let input_tokens = usage["prompt_tokens"].as_u64().unwrap_or(0) as u32;
    let output_tokens = usage["completion_tokens"].as_u64().unwrap_or(0) as u32;
    Usage {
        input_tokens,
        output_tokens,
        estimated_cost_usd: estimate_openai_cost(model, input_tokens, output_tokens),
    }
}

fn uses_max_completion_tokens(model: &str) -> bool {
    let m = model.to_lowercase();
    m.starts_with("o1") || m.starts_with("o3") || m.starts_with("o4") || m.contains("gpt-5")
}

/// Estimate cost for OpenAI models (USD per 1M tokens).
fn estimate_openai_cost(model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
    let (input_per_m, output_per_m) = match model {
        m if m.starts_with("gpt-4o-mini") => (0.15, 0.60),
        m if m.starts_with("gpt-4o") => (2.50, 10.00),
        m if m.starts_with("gpt-4.1-mini") => (0.40, 1.60),
        m if m.starts_with("gpt-4.1") => (2.00, 8.00),
        m if m.starts_with("o3-mini") => (1.10, 4.40),
        _ => (2.50, 10.00),
    };
    (input_tokens as f64 * input_per_m + output_tokens as f64 * output_per_m) / 1_000_000.0
}
