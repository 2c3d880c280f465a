use cadence_config::CadenceConfig;
use cadence_core::{CadenceError, Role};
use cadence_memory::CheckpointStore;
use cadence_orchestrator::Checkpoint;

use super::render;
use super::stack;

async fn load(store: &dyn CheckpointStore, thread: &str) -> cadence_core::Result<Checkpoint> {
    let record = store
        .load(thread)
        .await?
        .ok_or_else(|| CadenceError::Checkpoint(format!("no run with thread id '{thread}'")))?;
    serde_json::from_value(record.payload)
        .map_err(|e| CadenceError::Checkpoint(format!("corrupt checkpoint for '{thread}': {e}")))
}

pub(super) async fn cmd_show(
    config: &CadenceConfig,
    thread: &str,
    json: bool,
) -> cadence_core::Result<()> {
    let store = stack::open_store(config)?;
    let checkpoint = load(&store, thread).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&checkpoint)?);
        return Ok(());
    }

    println!("{}", render::checkpoint_summary(&checkpoint));
    println!("\nLog:");
    for msg in &checkpoint.run_state.messages {
        let who = match msg.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        };
        let phase = msg.meta_str("phase").unwrap_or("-");
        let text = msg.text_content();
        let text = if text.chars().count() > 160 {
            format!("{}...", text.chars().take(160).collect::<String>())
        } else {
            text
        };
        println!(
            "\x1b[90m{}\x1b[0m  {who:<9} {phase:<16} {}",
            msg.timestamp.format("%H:%M:%S"),
            text.replace('\n', " ")
        );
    }
    Ok(())
}

pub(super) async fn cmd_threads(config: &CadenceConfig) -> cadence_core::Result<()> {
    let store = stack::open_store(config)?;
    let threads = store.list_threads().await?;
    if threads.is_empty() {
        println!("No runs yet.");
        return Ok(());
    }

    for thread in threads {
        match load(&store, &thread).await {
            Ok(cp) => {
                let status = cp
                    .termination
                    .as_ref()
                    .map_or("in progress", |t| t.reason.as_str());
                println!(
                    "{}  {:<12} {:>3} tasks  {}",
                    cp.thread_id,
                    status,
                    cp.run_state.tasks.len(),
                    cp.user_request
                );
            }
            Err(e) => println!("{thread}  \x1b[31m{e}\x1b[0m"),
        }
    }
    Ok(())
}
