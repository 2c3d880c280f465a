use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::provider::*;
use cadence_core::{CadenceError, Result};

/// Maximum retry attempts for transient errors.
const MAX_RETRIES: u32 = 3;
/// Base delay for exponential backoff (doubles each retry).
const BASE_DELAY_MS: u64 = 1000;

/// Routes "provider/model" strings to a registered provider and retries
/// transient failures. Implements [`LlmProvider`] itself so callers never
/// need to know which backend answered.
#[derive(Clone, Default)]
pub struct ModelRouter {
    providers: Vec<Arc<dyn LlmProvider>>,
}

fn backoff_delay(err: &CadenceError, attempt: u32) -> Duration {
    match err {
        CadenceError::RateLimited { retry_after_secs } => Duration::from_secs(*retry_after_secs),
        _ => Duration::from_millis(BASE_DELAY_MS * 2u64.pow(attempt)),
    }
}

impl ModelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider.
    pub fn add_provider(&mut self, provider: Arc<dyn LlmProvider>) {
        info!(provider = %provider.name(), "registered LLM provider");
        self.providers.push(provider);
    }

    /// Builder-style [`add_provider`](Self::add_provider).
    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.add_provider(provider);
        self
    }

    /// Find the provider for a model string like "openai/gpt-4o-mini".
    fn resolve(&self, model: &str) -> Result<(Arc<dyn LlmProvider>, String)> {
        if let Some((prefix, model_name)) = model.split_once('/') {
            if let Some(p) = self
                .providers
                .iter()
                .find(|p| p.name().eq_ignore_ascii_case(prefix))
            {
                return Ok((Arc::clone(p), model_name.to_string()));
            }
        }
        // Bare model names: ask each provider's model list.
        self.providers
            .iter()
            .find(|p| p.models().iter().any(|m| m == model))
            .map(|p| (Arc::clone(p), model.to_string()))
            .ok_or_else(|| CadenceError::LlmProvider(format!("no provider for model '{model}'")))
    }

    /// Run `call` with exponential backoff on transient errors.
    async fn with_retry<T, F, Fut>(&self, provider: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Err(e) if e.is_transient() && attempt < MAX_RETRIES => {
                    let delay = backoff_delay(&e, attempt);
                    warn!(
                        provider,
                        attempt = attempt + 1,
                        max = MAX_RETRIES,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl LlmProvider for ModelRouter {
    fn name(&self) -> &str {
        "router"
    }

    fn models(&self) -> Vec<String> {
        self.providers
            .iter()
            .flat_map(|p| p.models().into_iter().map(move |m| format!("{}/{}", p.name(), m)))
            .collect()
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let (provider, model_name) = self.resolve(&request.model)?;
        let mut req = request.clone();
        req.model = model_name;
        self.with_retry(provider.name(), || provider.complete(&req)).await
    }

    async fn complete_structured(&self, request: &StructuredRequest) -> Result<StructuredResponse> {
        let (provider, model_name) = self.resolve(&request.model)?;
        let mut req = request.clone();
        req.model = model_name;
        self.with_retry(provider.name(), || provider.complete_structured(&req))
            .await
    }
}
