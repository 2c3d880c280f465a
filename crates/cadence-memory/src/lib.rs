//! # cadence-memory
//!
//! Durable memory for the orchestrator:
//! - **Episodic**: what happened during a run, with source references
//! - **Semantic**: distilled facts linked back to the episodes they came from
//! - **Checkpoints**: serialized run state keyed by thread id
//!
//! [`MemoryAccess`] is the only entry point the orchestrator uses for
//! memories; it validates, embeds, bounds every store call with a timeout and
//! retries with capped exponential backoff.

pub mod access;
pub mod backend;
pub mod checkpoint;
pub mod sqlite;
pub mod types;

pub use access::{MemoryAccess, MemoryAccessConfig, RetryPolicy, format_for_context};
pub use backend::{InMemoryBackend, MemoryBackend, cosine_similarity};
pub use checkpoint::{CheckpointRecord, CheckpointStore, InMemoryCheckpointStore};
pub use sqlite::SqliteStore;
pub use types::*;
