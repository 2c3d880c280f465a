use async_trait::async_trait;
use cadence_core::{CadenceError, MemoryId, Result, ThreadId};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::backend::{MemoryBackend, rank};
use crate::checkpoint::{CheckpointRecord, CheckpointStore};
use crate::types::*;

/// SQLite-backed memory and checkpoint store.
///
/// Statements run on the blocking pool. A caller that stops waiting (for
/// example on timeout) does not cancel the statement; it completes in the
/// background.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

fn db_err(e: rusqlite::Error) -> CadenceError {
    CadenceError::Memory(e.to_string())
}

impl SqliteStore {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        info!(?path, "opening memory store");

        let conn = Connection::open(path).map_err(db_err)?;

        // Enable WAL mode for concurrent reads
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS episodic_memories (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                run_id TEXT NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL,
                sources TEXT NOT NULL DEFAULT '[]',
                confidence REAL NOT NULL DEFAULT 1.0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS semantic_memories (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                run_id TEXT NOT NULL,
                fact TEXT NOT NULL,
                embedding BLOB NOT NULL,
                category TEXT NOT NULL,
                source_event_ids TEXT NOT NULL DEFAULT '[]',
                confidence REAL NOT NULL DEFAULT 1.0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS checkpoints (
                thread_id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_episodic_user ON episodic_memories(user_id, run_id);
            CREATE INDEX IF NOT EXISTS idx_semantic_user ON semantic_memories(user_id, run_id);
            CREATE INDEX IF NOT EXISTS idx_checkpoints_updated ON checkpoints(updated_at);
            ",
        )
        .map_err(db_err)?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let conn = db.lock();
            f(&conn)
        })
        .await
        .map_err(|e| CadenceError::Memory(format!("store task failed: {e}")))?
    }
}

fn to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn from_blob(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CadenceError::Memory(format!("bad timestamp '{raw}': {e}")))
}

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| CadenceError::Memory(format!("bad id '{raw}': {e}")))
}

/// Raw columns shared by both memory tables.
struct Row {
    id: String,
    user_id: String,
    run_id: String,
    text: String,
    embedding: Vec<u8>,
    /// sources (episodic) or source_event_ids (semantic), JSON.
    refs: String,
    category: Option<String>,
    confidence: f64,
    created_at: String,
    updated_at: String,
}

impl Row {
    fn into_record(self) -> Result<MemoryRecord> {
        let id = parse_id(&self.id)?;
        let embedding = from_blob(&self.embedding);
        let created_at = parse_time(&self.created_at)?;
        let updated_at = parse_time(&self.updated_at)?;
        let confidence = self.confidence as f32;

        Ok(match self.category {
            None => MemoryRecord::Episodic(EpisodicMemoryItem {
                id,
                user_id: self.user_id,
                run_id: self.run_id,
                content: self.text,
                embedding,
                sources: serde_json::from_str(&self.refs)?,
                confidence,
                created_at,
                updated_at,
            }),
            Some(category) => MemoryRecord::Semantic(SemanticMemoryItem {
                id,
                user_id: self.user_id,
                run_id: self.run_id,
                fact: self.text,
                embedding,
                category,
                source_event_ids: serde_json::from_str(&self.refs)?,
                confidence,
                created_at,
                updated_at,
            }),
        })
    }
}

fn load_candidates(conn: &Connection, user_id: &str, run_id: Option<&str>) -> Result<Vec<MemoryRecord>> {
    let queries = [
        "SELECT id, user_id, run_id, content, embedding, sources, NULL, confidence, created_at, updated_at
         FROM episodic_memories WHERE user_id = ?1 AND (?2 IS NULL OR run_id = ?2)",
        "SELECT id, user_id, run_id, fact, embedding, source_event_ids, category, confidence, created_at, updated_at
         FROM semantic_memories WHERE user_id = ?1 AND (?2 IS NULL OR run_id = ?2)",
    ];

    let mut records = Vec::new();
    for sql in queries {
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params![user_id, run_id], |row| {
                Ok(Row {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    run_id: row.get(2)?,
                    text: row.get(3)?,
                    embedding: row.get(4)?,
                    refs: row.get(5)?,
                    category: row.get(6)?,
                    confidence: row.get(7)?,
                    created_at: row.get(8)?,
                    updated_at: row.get(9)?,
                })
            })
            .map_err(db_err)?;
        for row in rows {
            records.push(row.map_err(db_err)?.into_record()?);
        }
    }
    Ok(records)
}

#[async_trait]
impl MemoryBackend for SqliteStore {
    async fn insert_episodic(&self, item: EpisodicMemoryItem) -> Result<MemoryId> {
        let sources = serde_json::to_string(&item.sources)?;
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO episodic_memories
                    (id, user_id, run_id, content, embedding, sources, confidence, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    item.id.to_string(),
                    item.user_id,
                    item.run_id,
                    item.content,
                    to_blob(&item.embedding),
                    sources,
                    item.confidence as f64,
                    item.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
                    item.updated_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
                ],
            )
            .map_err(db_err)?;
            Ok(item.id)
        })
        .await
    }

    async fn insert_semantic(&self, item: SemanticMemoryItem) -> Result<MemoryId> {
        let source_event_ids = serde_json::to_string(&item.source_event_ids)?;
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO semantic_memories
                    (id, user_id, run_id, fact, embedding, category, source_event_ids, confidence, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    item.id.to_string(),
                    item.user_id,
                    item.run_id,
                    item.fact,
                    to_blob(&item.embedding),
                    item.category,
                    source_event_ids,
                    item.confidence as f64,
                    item.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
                    item.updated_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
                ],
            )
            .map_err(db_err)?;
            Ok(item.id)
        })
        .await
    }

    async fn query_similar(&self, query: &SimilarityQuery) -> Result<Vec<SimilarMemory>> {
        let user_id = query.user_id.clone();
        let run_id = query.run_id.clone();
        let candidates = self
            .blocking(move |conn| load_candidates(conn, &user_id, run_id.as_deref()))
            .await?;
        debug!(candidates = candidates.len(), "scoring stored memories");
        Ok(rank(candidates, &query.embedding, query.limit))
    }
}

#[async_trait]
impl CheckpointStore for SqliteStore {
    async fn load(&self, thread_id: &str) -> Result<Option<CheckpointRecord>> {
        let key = thread_id.to_string();
        let row: Option<(String, String)> = self
            .blocking(move |conn| {
                conn.query_row(
                    "SELECT payload, updated_at FROM checkpoints WHERE thread_id = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(db_err)
            })
            .await?;

        let Some((payload, updated_at)) = row else {
            return Ok(None);
        };
        Ok(Some(CheckpointRecord {
            thread_id: thread_id.to_string(),
            payload: serde_json::from_str(&payload)
                .map_err(|e| CadenceError::Checkpoint(format!("corrupt checkpoint: {e}")))?,
            updated_at: parse_time(&updated_at)?,
        }))
    }

    async fn save(&self, record: &CheckpointRecord) -> Result<()> {
        let thread_id = record.thread_id.clone();
        let payload = serde_json::to_string(&record.payload)?;
        let updated_at = record.updated_at.to_rfc3339_opts(SecondsFormat::Nanos, true);
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO checkpoints (thread_id, payload, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(thread_id) DO UPDATE SET
                    payload = excluded.payload,
                    updated_at = excluded.updated_at",
                params![thread_id, payload, updated_at],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn list_threads(&self) -> Result<Vec<ThreadId>> {
        self.blocking(|conn| {
            let mut stmt = conn
                .prepare("SELECT thread_id FROM checkpoints ORDER BY updated_at DESC")
                .map_err(db_err)?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(db_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err)?;
            Ok(ids)
        })
        .await
    }
}
