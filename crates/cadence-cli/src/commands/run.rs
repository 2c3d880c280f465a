use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::warn;

use cadence_config::CadenceConfig;
use cadence_core::Event;
use cadence_orchestrator::{RunOutcome, RunRequest, TerminationReason};

use super::render;
use super::stack;

pub(super) async fn cmd_run(
    config: &CadenceConfig,
    objective: String,
    thread: Option<String>,
    user: String,
    quiet: bool,
) -> cadence_core::Result<()> {
    let stack = stack::build(config)?;
    let follower = (!quiet).then(|| follow(&stack.orchestrator));

    let mut request = RunRequest::new(objective, user);
    request.thread_id = thread;
    let outcome = stack.orchestrator.run(request).await;
    finish(stack, follower, outcome).await
}

pub(super) async fn cmd_resume(
    config: &CadenceConfig,
    thread: &str,
    quiet: bool,
) -> cadence_core::Result<()> {
    let stack = stack::build(config)?;
    let follower = (!quiet).then(|| follow(&stack.orchestrator));

    let outcome = stack.orchestrator.resume(thread).await;
    finish(stack, follower, outcome).await
}

/// Drain the event printer before the summary. Dropping the stack closes
/// the event bus, so the follower ends even when no `RunTerminated` arrives.
async fn finish(
    stack: stack::Stack,
    follower: Option<JoinHandle<()>>,
    outcome: cadence_core::Result<RunOutcome>,
) -> cadence_core::Result<()> {
    let usage = stack.usage.snapshot();
    drop(stack);
    if let Some(follower) = follower
        && let Err(e) = follower.await
    {
        warn!(error = %e, "event printer stopped abnormally");
    }

    report(&outcome?, &usage);
    Ok(())
}

/// Print progress events as the run advances.
fn follow(orchestrator: &cadence_orchestrator::Orchestrator) -> JoinHandle<()> {
    let mut rx = orchestrator.events().subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(line) = render::event_line(&event) {
                        println!("{line}");
                    }
                    if matches!(event, Event::RunTerminated { .. }) {
                        break;
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn report(outcome: &RunOutcome, usage: &cadence_llm::UsageSnapshot) {
    println!();
    println!("{}", render::outcome_summary(outcome));
    if usage.calls > 0 {
        println!(
            "\x1b[90m{} model calls, {} tokens, ~${:.4}\x1b[0m",
            usage.calls,
            usage.total.total_tokens(),
            usage.total.estimated_cost_usd
        );
    }
    if outcome.termination.reason != TerminationReason::Completed {
        println!(
            "\x1b[90mInspect with: cadence show {}\x1b[0m",
            outcome.thread_id
        );
    }
}
