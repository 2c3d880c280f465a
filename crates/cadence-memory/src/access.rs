use cadence_config::{MemoryConfig, StoreRetryConfig};
use cadence_core::{CadenceError, Result};
use cadence_llm::EmbeddingProvider;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::MemoryBackend;
use crate::types::*;

/// Timeout and capped exponential backoff for one class of store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts before giving up.
    pub max_retries: u32,
    /// Bound on a single attempt.
    pub timeout: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn upsert_default() -> Self {
        Self::from_config(&StoreRetryConfig::default())
    }

    pub fn retrieve_default() -> Self {
        Self::from_config(&StoreRetryConfig::retrieve_defaults())
    }

    pub fn from_config(config: &StoreRetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            timeout: config.timeout(),
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
        }
    }

    /// Delay after the `failures`-th consecutive failure (1-based).
    pub fn delay_after(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.max_retries == 0 {
            return Err(CadenceError::ConfigValidation {
                field: format!("{name}.max_retries"),
                reason: "must be at least 1".into(),
            });
        }
        if self.timeout.is_zero() {
            return Err(CadenceError::ConfigValidation {
                field: format!("{name}.timeout"),
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MemoryAccessConfig {
    pub upsert: RetryPolicy,
    pub retrieve: RetryPolicy,
    /// Threshold used when a recall does not pass its own.
    pub similarity_threshold: f32,
}

impl Default for MemoryAccessConfig {
    fn default() -> Self {
        Self {
            upsert: RetryPolicy::upsert_default(),
            retrieve: RetryPolicy::retrieve_default(),
            similarity_threshold: 0.7,
        }
    }
}

impl MemoryAccessConfig {
    pub fn from_config(config: &MemoryConfig) -> Self {
        Self {
            upsert: RetryPolicy::from_config(&config.upsert),
            retrieve: RetryPolicy::from_config(&config.retrieve),
            similarity_threshold: config.similarity_threshold,
        }
    }
}

enum AttemptError {
    /// Deterministic failure: give up immediately.
    Fatal(String),
    Retryable(String),
}

impl From<CadenceError> for AttemptError {
    fn from(e: CadenceError) -> Self {
        if e.is_transient() {
            AttemptError::Retryable(e.to_string())
        } else {
            AttemptError::Fatal(e.to_string())
        }
    }
}

/// Validated, embedded, timeout-bounded access to durable memory.
///
/// Business failures never surface as `Err`: every operation returns a
/// [`MemoryOperationResult`] instead.
#[derive(Clone)]
pub struct MemoryAccess {
    backend: Arc<dyn MemoryBackend>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: MemoryAccessConfig,
}

impl MemoryAccess {
    /// Fails when either retry policy allows no attempts or has a zero timeout.
    pub fn new(
        backend: Arc<dyn MemoryBackend>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: MemoryAccessConfig,
    ) -> Result<Self> {
        config.upsert.validate("upsert")?;
        config.retrieve.validate("retrieve")?;
        Ok(Self {
            backend,
            embedder,
            config,
        })
    }

    pub fn config(&self) -> &MemoryAccessConfig {
        &self.config
    }

    /// Embed and store episodic items, then semantic facts linked to them.
    ///
    /// Every item is validated before anything is written; one invalid item
    /// fails the whole call with no store calls made.
    pub async fn upsert(
        &self,
        semantic: &[SemanticInput],
        episodic: &[EpisodicInput],
    ) -> MemoryOperationResult<UpsertReceipt> {
        let problems = validate_upsert(semantic, episodic);
        if !problems.is_empty() {
            let error = format!("validation failed: {}", problems.join("; "));
            warn!(%error, "rejected memory upsert");
            return MemoryOperationResult::failure(error);
        }
        if semantic.is_empty() && episodic.is_empty() {
            return MemoryOperationResult::ok(UpsertReceipt::default());
        }

        let result = self
            .with_retries("upsert", &self.config.upsert, || self.upsert_attempt(semantic, episodic))
            .await;
        if let Some(receipt) = result.data.as_ref() {
            info!(
                episodic = receipt.episodic_ids.len(),
                semantic = receipt.semantic_ids.len(),
                "stored memories"
            );
        }
        result
    }

    /// Memories of `user_id` (optionally one run) whose similarity to `query`
    /// is at least `threshold` (default from config), best first.
    pub async fn retrieve_similar(
        &self,
        query: &str,
        user_id: &str,
        run_id: Option<&str>,
        limit: usize,
        threshold: Option<f32>,
    ) -> MemoryOperationResult<Vec<SimilarMemory>> {
        if query.trim().is_empty() {
            return MemoryOperationResult::failure("validation failed: query must not be empty");
        }
        if user_id.trim().is_empty() {
            return MemoryOperationResult::failure("validation failed: user_id must not be empty");
        }
        let threshold = threshold.unwrap_or(self.config.similarity_threshold);
        if !(0.0..=1.0).contains(&threshold) {
            return MemoryOperationResult::failure(format!(
                "validation failed: threshold {threshold} is outside 0.0-1.0"
            ));
        }
        if limit == 0 {
            return MemoryOperationResult::ok(vec![]);
        }

        self.with_retries("retrieve_similar", &self.config.retrieve, || {
            self.retrieve_attempt(query, user_id, run_id, limit, threshold)
        })
        .await
    }

    async fn upsert_attempt(
        &self,
        semantic: &[SemanticInput],
        episodic: &[EpisodicInput],
    ) -> std::result::Result<UpsertReceipt, AttemptError> {
        let texts: Vec<&str> = episodic
            .iter()
            .map(|e| e.content.as_str())
            .chain(semantic.iter().map(|s| s.fact.as_str()))
            .collect();
        let embeddings = self.embed_all(&texts).await?;
        let (episodic_vectors, semantic_vectors) = embeddings.split_at(episodic.len());

        let now = Utc::now();
        let mut receipt = UpsertReceipt::default();

        for (input, embedding) in episodic.iter().zip(episodic_vectors) {
            let id = self
                .backend
                .insert_episodic(EpisodicMemoryItem {
                    id: Uuid::new_v4(),
                    user_id: input.user_id.clone(),
                    run_id: input.run_id.clone(),
                    content: input.content.clone(),
                    embedding: embedding.clone(),
                    sources: input.sources.clone(),
                    confidence: input.confidence,
                    created_at: now,
                    updated_at: now,
                })
                .await?;
            receipt.episodic_ids.push(id);
        }

        // Episodic writes are complete here; facts link to them.
        for (input, embedding) in semantic.iter().zip(semantic_vectors) {
            let mut source_event_ids = input.source_event_ids.clone();
            for id in &receipt.episodic_ids {
                if !source_event_ids.contains(id) {
                    source_event_ids.push(*id);
                }
            }
            let id = self
                .backend
                .insert_semantic(SemanticMemoryItem {
                    id: Uuid::new_v4(),
                    user_id: input.user_id.clone(),
                    run_id: input.run_id.clone(),
                    fact: input.fact.clone(),
                    embedding: embedding.clone(),
                    category: input.category.clone(),
                    source_event_ids,
                    confidence: input.confidence,
                    created_at: now,
                    updated_at: now,
                })
                .await?;
            receipt.semantic_ids.push(id);
        }

        Ok(receipt)
    }

    async fn retrieve_attempt(
        &self,
        query: &str,
        user_id: &str,
        run_id: Option<&str>,
        limit: usize,
        threshold: f32,
    ) -> std::result::Result<Vec<SimilarMemory>, AttemptError> {
        let mut vectors = self.embed_all(&[query]).await?;
        let embedding = vectors.pop().unwrap_or_default();

        let found = self
            .backend
            .query_similar(&SimilarityQuery {
                user_id: user_id.to_string(),
                run_id: run_id.map(String::from),
                embedding,
                limit,
            })
            .await?;
        let total = found.len();
        let kept: Vec<SimilarMemory> = found
            .into_iter()
            .filter(|m| m.similarity >= threshold)
            .collect();
        debug!(total, kept = kept.len(), threshold, "recalled memories");
        Ok(kept)
    }

    /// One vector per text, all non-empty and of equal length.
    async fn embed_all(&self, texts: &[&str]) -> std::result::Result<Vec<Vec<f32>>, AttemptError> {
        let vectors = self.embedder.embed(texts).await?;
        if vectors.len() != texts.len() {
            return Err(AttemptError::Fatal(format!(
                "embedder returned {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            )));
        }
        if let Some(i) = vectors.iter().position(Vec::is_empty) {
            return Err(AttemptError::Fatal(format!("embedding for item {i} is empty")));
        }
        if let Some(first) = vectors.first()
            && vectors.iter().any(|v| v.len() != first.len())
        {
            return Err(AttemptError::Fatal("embeddings have inconsistent dimensions".into()));
        }
        Ok(vectors)
    }

    async fn with_retries<T, F, Fut>(
        &self,
        operation: &'static str,
        policy: &RetryPolicy,
        mut attempt: F,
    ) -> MemoryOperationResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, AttemptError>>,
    {
        let mut last_error = String::new();
        for n in 1..=policy.max_retries {
            match tokio::time::timeout(policy.timeout, attempt()).await {
                Ok(Ok(value)) => return MemoryOperationResult::ok(value),
                Ok(Err(AttemptError::Fatal(error))) => {
                    warn!(operation, attempt = n, %error, "store operation failed permanently");
                    return MemoryOperationResult::failure(error);
                }
                Ok(Err(AttemptError::Retryable(error))) => {
                    warn!(operation, attempt = n, max = policy.max_retries, %error, "store operation failed");
                    last_error = error;
                }
                Err(_) => {
                    let error = CadenceError::StoreTimeout {
                        operation: operation.to_string(),
                        timeout_ms: policy.timeout.as_millis() as u64,
                    };
                    warn!(operation, attempt = n, max = policy.max_retries, %error, "store operation timed out");
                    last_error = error.to_string();
                }
            }
            if n < policy.max_retries {
                tokio::time::sleep(policy.delay_after(n)).await;
            }
        }
        MemoryOperationResult::failure(format!(
            "{operation} failed after {} attempts: {last_error}",
            policy.max_retries
        ))
    }
}

fn validate_upsert(semantic: &[SemanticInput], episodic: &[EpisodicInput]) -> Vec<String> {
    let mut problems = Vec::new();

    for (i, item) in episodic.iter().enumerate() {
        let label = format!("episodic[{i}]");
        check_text(&mut problems, &label, "content", &item.content);
        check_owner(&mut problems, &label, &item.user_id, &item.run_id);
        check_confidence(&mut problems, &label, item.confidence);
        if item.sources.iter().all(|s| s.trim().is_empty()) {
            problems.push(format!("{label}: sources must contain at least one reference"));
        }
    }

    for (i, item) in semantic.iter().enumerate() {
        let label = format!("semantic[{i}]");
        check_text(&mut problems, &label, "fact", &item.fact);
        check_owner(&mut problems, &label, &item.user_id, &item.run_id);
        check_confidence(&mut problems, &label, item.confidence);
        if item.category.trim().is_empty() {
            problems.push(format!("{label}: category must not be empty"));
        }
    }

    problems
}

fn check_text(problems: &mut Vec<String>, label: &str, field: &str, text: &str) {
    if text.trim().is_empty() {
        problems.push(format!("{label}: {field} must not be empty"));
    } else if text.chars().count() > MAX_CONTENT_CHARS {
        problems.push(format!("{label}: {field} exceeds {MAX_CONTENT_CHARS} characters"));
    }
}

fn check_owner(problems: &mut Vec<String>, label: &str, user_id: &str, run_id: &str) {
    if user_id.trim().is_empty() {
        problems.push(format!("{label}: user_id must not be empty"));
    }
    if run_id.trim().is_empty() {
        problems.push(format!("{label}: run_id must not be empty"));
    }
}

fn check_confidence(problems: &mut Vec<String>, label: &str, confidence: f32) {
    if !(0.0..=1.0).contains(&confidence) {
        problems.push(format!("{label}: confidence {confidence} is outside 0.0-1.0"));
    }
}

/// Render recalled memories for a prompt: one line per item, episodic lines
/// first, then semantic lines. The two blocks are concatenated as-is, so the
/// last episodic line runs straight into the first semantic line.
pub fn format_for_context(results: &[SimilarMemory]) -> String {
    let mut episodic = Vec::new();
    let mut semantic = Vec::new();

    for m in results {
        match &m.record {
            MemoryRecord::Episodic(e) => episodic.push(format!(
                "- [{}] ({:.2}) {} (sources: {})",
                e.id,
                m.similarity,
                e.content,
                e.sources.join(", ")
            )),
            MemoryRecord::Semantic(s) => semantic.push(format!(
                "- [{}] ({:.2}) {} (category: {})",
                s.id, m.similarity, s.fact, s.category
            )),
        }
    }

    let mut out = episodic.join("\n");
    out.push_str(&semantic.join("\n"));
    out
}
