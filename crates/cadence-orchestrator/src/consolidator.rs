use async_trait::async_trait;
use cadence_core::Result;
use cadence_memory::{EpisodicInput, MemoryAccess, SemanticInput, format_for_context};
use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::state::{RunState, TaskStatus};

/// Moves finished work from the run state into durable memory and refreshes
/// the recalled context.
#[async_trait]
pub trait MemoryConsolidator: Send + Sync {
    async fn consolidate(&self, state: &mut RunState, ctx: &RunContext) -> Result<()>;
}

pub struct StoreConsolidator {
    memory: MemoryAccess,
    retrieve_limit: usize,
}

impl StoreConsolidator {
    pub fn new(memory: MemoryAccess, retrieve_limit: usize) -> Self {
        Self {
            memory,
            retrieve_limit,
        }
    }

    async fn store_active_task(&self, state: &mut RunState, ctx: &RunContext) {
        let Some(task) = state
            .active_task()
            .filter(|t| t.status.is_finished() && !t.consolidated)
        else {
            return;
        };

        let completed = task.status == TaskStatus::Completed;
        let verification = task.verification.as_deref().unwrap_or("not verified");
        let episodic = EpisodicInput {
            user_id: ctx.user_id.clone(),
            run_id: ctx.thread_id.clone(),
            content: format!(
                "Task: {}\nOutcome: {}\nVerification: {}",
                task.directive,
                task.status.as_str(),
                verification
            ),
            sources: vec![task.id.to_string(), ctx.thread_id.clone()],
            confidence: 1.0,
        };
        let semantic: Vec<SemanticInput> = if completed {
            vec![SemanticInput {
                user_id: ctx.user_id.clone(),
                run_id: ctx.thread_id.clone(),
                fact: format!("{}: {}", task.directive, verification),
                category: "task_outcome".into(),
                source_event_ids: vec![],
                confidence: f32::from(task.confidence.unwrap_or(100)) / 100.0,
            }]
        } else {
            vec![]
        };
        let task_id = task.id;

        let result = self.memory.upsert(&semantic, &[episodic]).await;
        if result.success {
            info!(thread_id = %ctx.thread_id, task_id = %task_id, "consolidated task into memory");
        } else {
            warn!(
                thread_id = %ctx.thread_id,
                task_id = %task_id,
                error = result.error.as_deref().unwrap_or("unknown"),
                "could not consolidate task"
            );
        }
        if let Some(task) = state.active_task_mut() {
            task.consolidated = result.success;
        }
    }
}

#[async_trait]
impl MemoryConsolidator for StoreConsolidator {
    async fn consolidate(&self, state: &mut RunState, ctx: &RunContext) -> Result<()> {
        self.store_active_task(state, ctx).await;

        let recalled = self
            .memory
            .retrieve_similar(&ctx.objective, &ctx.user_id, None, self.retrieve_limit, None)
            .await;
        match recalled.into_data() {
            Some(items) => {
                debug!(thread_id = %ctx.thread_id, recalled = items.len(), "refreshed context");
                state.rag_context = format_for_context(&items);
            }
            None => warn!(thread_id = %ctx.thread_id, "memory recall failed; keeping previous context"),
        }
        Ok(())
    }
}
