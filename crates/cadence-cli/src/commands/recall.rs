use cadence_config::CadenceConfig;
use cadence_core::CadenceError;
use cadence_memory::{MemoryKind, format_for_context};

use super::stack;

pub(super) async fn cmd_recall(
    config: &CadenceConfig,
    query: &str,
    user: &str,
    thread: Option<&str>,
    limit: usize,
    threshold: Option<f32>,
) -> cadence_core::Result<()> {
    let store = stack::open_store(config)?;
    let memory = stack::memory_access(config, &store)?;

    let result = memory
        .retrieve_similar(query, user, thread, limit, threshold)
        .await;
    if !result.success {
        return Err(CadenceError::Memory(
            result.error.unwrap_or_else(|| "recall failed".into()),
        ));
    }

    let items = result.data.unwrap_or_default();
    if items.is_empty() {
        println!("No memories above the similarity threshold.");
        return Ok(());
    }
    let (episodic, semantic): (Vec<_>, Vec<_>) = items
        .into_iter()
        .partition(|m| m.record.kind() == MemoryKind::Episodic);
    for (title, block) in [("Episodic", episodic), ("Semantic", semantic)] {
        if !block.is_empty() {
            println!("\x1b[1m{title}\x1b[0m\n{}", format_for_context(&block));
        }
    }
    Ok(())
}
