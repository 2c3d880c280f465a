use async_trait::async_trait;
use cadence_core::{Result, ThreadId};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// A persisted snapshot of one thread. The payload is whatever the
/// orchestrator serialized; the store never looks inside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub thread_id: ThreadId,
    pub payload: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// Latest-checkpoint-wins storage keyed by thread id.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, thread_id: &str) -> Result<Option<CheckpointRecord>>;

    /// Replace the thread's checkpoint.
    async fn save(&self, record: &CheckpointRecord) -> Result<()>;

    /// Known thread ids, most recently updated first.
    async fn list_threads(&self) -> Result<Vec<ThreadId>>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointStore {
    records: Arc<RwLock<HashMap<ThreadId, CheckpointRecord>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, thread_id: &str) -> Result<Option<CheckpointRecord>> {
        Ok(self.records.read().get(thread_id).cloned())
    }

    async fn save(&self, record: &CheckpointRecord) -> Result<()> {
        self.records
            .write()
            .insert(record.thread_id.clone(), record.clone());
        Ok(())
    }

    async fn list_threads(&self) -> Result<Vec<ThreadId>> {
        let records = self.records.read();
        let mut all: Vec<&CheckpointRecord> = records.values().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(all.into_iter().map(|r| r.thread_id.clone()).collect())
    }
}
