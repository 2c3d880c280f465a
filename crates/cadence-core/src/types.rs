use uuid::Uuid;

/// Identifier of a resumable run. Checkpoints are keyed by it.
pub type ThreadId = String;

/// Unique identifier for a task.
pub type TaskId = Uuid;

/// Identifier of the user a run (and its memories) belongs to.
pub type UserId = String;

/// Identifier of a stored memory item.
pub type MemoryId = Uuid;

/// Generate a fresh thread id.
pub fn new_thread_id() -> ThreadId {
    format!("thread-{}", Uuid::new_v4())
}
