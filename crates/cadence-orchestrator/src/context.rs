use cadence_config::AgentConfig;
use cadence_core::{ThreadId, UserId};
use serde::{Deserialize, Serialize};

/// Immutable facts about a run, shared by every phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    pub thread_id: ThreadId,
    pub user_id: UserId,
    /// The user's request the run is working towards.
    pub objective: String,
    /// Agent profile captured when the run started.
    pub agent: AgentConfig,
}
