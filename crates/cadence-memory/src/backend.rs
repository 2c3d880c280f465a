use async_trait::async_trait;
use cadence_core::{MemoryId, Result};
use parking_lot::RwLock;
use std::sync::Arc;

use crate::types::*;

/// Durable storage for memory items. Implementations only store and search;
/// validation, embedding and retries belong to [`crate::MemoryAccess`].
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    async fn insert_episodic(&self, item: EpisodicMemoryItem) -> Result<MemoryId>;

    async fn insert_semantic(&self, item: SemanticMemoryItem) -> Result<MemoryId>;

    /// Nearest neighbours of `query.embedding` among the user's memories,
    /// best first, at most `query.limit`.
    async fn query_similar(&self, query: &SimilarityQuery) -> Result<Vec<SimilarMemory>>;
}

/// Compute cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Score `records` against `query`, best first, truncated to `limit`.
pub(crate) fn rank(records: Vec<MemoryRecord>, query: &[f32], limit: usize) -> Vec<SimilarMemory> {
    let mut scored: Vec<SimilarMemory> = records
        .into_iter()
        .map(|record| {
            let similarity = cosine_similarity(query, record.embedding());
            SimilarMemory { record, similarity }
        })
        .collect();
    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(limit);
    scored
}

/// Process-local backend. Used by tests and by runs without a database.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    records: Arc<RwLock<Vec<MemoryRecord>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn episodic(&self) -> Vec<EpisodicMemoryItem> {
        self.records
            .read()
            .iter()
            .filter_map(|r| match r {
                MemoryRecord::Episodic(e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn semantic(&self) -> Vec<SemanticMemoryItem> {
        self.records
            .read()
            .iter()
            .filter_map(|r| match r {
                MemoryRecord::Semantic(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl MemoryBackend for InMemoryBackend {
    async fn insert_episodic(&self, item: EpisodicMemoryItem) -> Result<MemoryId> {
        let id = item.id;
        self.records.write().push(MemoryRecord::Episodic(item));
        Ok(id)
    }

    async fn insert_semantic(&self, item: SemanticMemoryItem) -> Result<MemoryId> {
        let id = item.id;
        self.records.write().push(MemoryRecord::Semantic(item));
        Ok(id)
    }

    async fn query_similar(&self, query: &SimilarityQuery) -> Result<Vec<SimilarMemory>> {
        let candidates: Vec<MemoryRecord> = self
            .records
            .read()
            .iter()
            .filter(|r| {
                let (user, run) = match r {
                    MemoryRecord::Episodic(e) => (&e.user_id, &e.run_id),
                    MemoryRecord::Semantic(s) => (&s.user_id, &s.run_id),
                };
                *user == query.user_id && query.run_id.as_ref().is_none_or(|q| q == run)
            })
            .cloned()
            .collect();
        Ok(rank(candidates, &query.embedding, query.limit))
    }
}
