use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::provider::Usage;

/// Advisory token/cost counter shared across runs. Never consulted for
/// control flow.
#[derive(Debug, Clone, Default)]
pub struct UsageMeter {
    state: Arc<RwLock<UsageSnapshot>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// Model calls recorded.
    pub calls: u64,
    /// Usage summed over every call.
    pub total: Usage,
    /// Usage keyed by the phase that made the call ("task_planner", ...).
    pub by_phase: BTreeMap<String, Usage>,
}

impl UsageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the usage of one model call.
    pub fn record(&self, phase: &str, usage: &Usage) {
        let mut state = self.state.write();
        state.calls += 1;
        state.total.merge(usage);
        state.by_phase.entry(phase.to_string()).or_default().merge(usage);
        debug!(
            phase,
            tokens = usage.total_tokens(),
            total_cost_usd = state.total.estimated_cost_usd,
            "recorded model usage"
        );
    }

    /// Get the current counters.
    pub fn snapshot(&self) -> UsageSnapshot {
        self.state.read().clone()
    }
}
