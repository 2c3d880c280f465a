use cadence_core::MemoryId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum characters in a memory's content or fact.
pub const MAX_CONTENT_CHARS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Episodic,
    Semantic,
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryKind::Episodic => write!(f, "episodic"),
            MemoryKind::Semantic => write!(f, "semantic"),
        }
    }
}

/// Something that happened, with references to where it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicMemoryItem {
    pub id: MemoryId,
    pub user_id: String,
    pub run_id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    /// Source references (task ids, thread ids, urls...). Never empty.
    pub sources: Vec<String>,
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A distilled fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticMemoryItem {
    pub id: MemoryId,
    pub user_id: String,
    pub run_id: String,
    pub fact: String,
    pub embedding: Vec<f32>,
    pub category: String,
    /// Episodic items this fact was derived from.
    pub source_event_ids: Vec<MemoryId>,
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller-supplied episodic memory, before embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicInput {
    pub user_id: String,
    pub run_id: String,
    pub content: String,
    pub sources: Vec<String>,
    pub confidence: f32,
}

/// Caller-supplied semantic fact, before embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticInput {
    pub user_id: String,
    pub run_id: String,
    pub fact: String,
    pub category: String,
    /// Extra episodic ids to link, on top of the ones inserted alongside.
    #[serde(default)]
    pub source_event_ids: Vec<MemoryId>,
    pub confidence: f32,
}

/// A stored memory of either kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MemoryRecord {
    Episodic(EpisodicMemoryItem),
    Semantic(SemanticMemoryItem),
}

impl MemoryRecord {
    pub fn kind(&self) -> MemoryKind {
        match self {
            MemoryRecord::Episodic(_) => MemoryKind::Episodic,
            MemoryRecord::Semantic(_) => MemoryKind::Semantic,
        }
    }

    pub fn id(&self) -> MemoryId {
        match self {
            MemoryRecord::Episodic(e) => e.id,
            MemoryRecord::Semantic(s) => s.id,
        }
    }

    /// Content of an episode or the text of a fact.
    pub fn text(&self) -> &str {
        match self {
            MemoryRecord::Episodic(e) => &e.content,
            MemoryRecord::Semantic(s) => &s.fact,
        }
    }

    pub fn embedding(&self) -> &[f32] {
        match self {
            MemoryRecord::Episodic(e) => &e.embedding,
            MemoryRecord::Semantic(s) => &s.embedding,
        }
    }
}

/// A recalled memory and its cosine similarity to the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarMemory {
    pub record: MemoryRecord,
    pub similarity: f32,
}

/// Nearest-neighbour query handed to a backend.
#[derive(Debug, Clone)]
pub struct SimilarityQuery {
    pub user_id: String,
    /// Restrict to one run when set.
    pub run_id: Option<String>,
    pub embedding: Vec<f32>,
    pub limit: usize,
}

/// Ids written by one successful `upsert`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpsertReceipt {
    pub episodic_ids: Vec<MemoryId>,
    pub semantic_ids: Vec<MemoryId>,
}

/// Outcome of a memory operation. Business failures are reported here
/// instead of as `Err`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryOperationResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T> MemoryOperationResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }

    /// Data if the operation succeeded.
    pub fn into_data(self) -> Option<T> {
        if self.success { self.data } else { None }
    }
}
