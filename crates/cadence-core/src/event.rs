use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::sync::Arc;
use tokio::sync::broadcast;

/// Events published while runs progress. Purely observational; nothing in the
/// orchestrator reads them back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    // ── Run lifecycle ──────────────────────────────────────────
    RunStarted {
        thread_id: String,
        objective: String,
    },
    RunResumed {
        thread_id: String,
        last_node: Option<String>,
    },
    PhaseEntered {
        thread_id: String,
        phase: String,
        rule: String,
    },
    CheckpointSaved {
        thread_id: String,
        transitions: u32,
    },
    RunTerminated {
        thread_id: String,
        reason: String,
        message: String,
    },

    // ── Task lifecycle ─────────────────────────────────────────
    TaskCreated {
        thread_id: String,
        task_id: Uuid,
        directive: String,
    },
    StepRecorded {
        thread_id: String,
        task_id: Uuid,
        step: u32,
        status: String,
    },
    TaskVerified {
        thread_id: String,
        task_id: Uuid,
        accepted: bool,
        confidence: u8,
    },
    RetryScheduled {
        thread_id: String,
        source: String,
        retry: u32,
    },

    // ── Memory ─────────────────────────────────────────────────
    MemoryConsolidated {
        thread_id: String,
        task_id: Uuid,
    },
}

/// A broadcast-based event bus for run observers.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<Event>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn publish(&self, event: Event) {
        // Ignore send errors (no subscribers).
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
