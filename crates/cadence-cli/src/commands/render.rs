//! Plain-text rendering of runs for the terminal.

use std::fmt::Write as _;

use cadence_core::Event;
use cadence_orchestrator::{Checkpoint, RunOutcome, RunState, TaskStatus, TerminationReason};

fn status_icon(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "○",
        TaskStatus::AwaitingVerification => "◐",
        TaskStatus::Completed => "✅",
        TaskStatus::Failed => "❌",
    }
}

fn reason_icon(reason: TerminationReason) -> &'static str {
    match reason {
        TerminationReason::Completed => "✅",
        TerminationReason::Error => "❌",
        TerminationReason::RetryLimit | TerminationReason::TransitionLimit => "⏱",
        TerminationReason::Directive => "↪",
    }
}

/// One line per task, in creation order.
pub fn task_list(state: &RunState) -> String {
    if state.tasks.is_empty() {
        return "  (no tasks)".to_string();
    }
    let mut out = String::new();
    for (i, task) in state.tasks.iter().enumerate() {
        let active = if state.active_task_id == Some(task.id) { "*" } else { " " };
        let _ = write!(
            out,
            "{active} {}. {} {} [{}]",
            i + 1,
            status_icon(task.status),
            task.directive,
            task.status.as_str()
        );
        if let Some(confidence) = task.confidence {
            let _ = write!(out, " ({confidence}%)");
        }
        out.push('\n');
        if let Some(ref note) = task.verification {
            let _ = writeln!(out, "      {note}");
        }
    }
    out.trim_end().to_string()
}

pub fn outcome_summary(outcome: &RunOutcome) -> String {
    let t = &outcome.termination;
    format!(
        "{} {} ({}) after {} transitions\n{}\n\nTasks:\n{}",
        reason_icon(t.reason),
        outcome.thread_id,
        t.reason,
        outcome.transitions,
        t.message,
        task_list(&outcome.state)
    )
}

pub fn checkpoint_summary(checkpoint: &Checkpoint) -> String {
    let mut out = format!(
        "\x1b[1m{}\x1b[0m  user={}  updated={}\nObjective: {}\n",
        checkpoint.thread_id,
        checkpoint.user_id,
        checkpoint.updated_at.format("%Y-%m-%d %H:%M:%S"),
        checkpoint.user_request
    );
    match checkpoint.termination {
        Some(ref t) => {
            let _ = writeln!(out, "Status: {} {} ({})", reason_icon(t.reason), t.reason, t.message);
        }
        None => {
            let last = checkpoint
                .run_state
                .last_node
                .map_or("start", |n| n.as_str());
            let _ = writeln!(out, "Status: in progress (last phase: {last})");
        }
    }
    let state = &checkpoint.run_state;
    let _ = writeln!(
        out,
        "Transitions: {}  Retries: {}  Tasks created: {}",
        checkpoint.transitions, state.retry, state.step_count
    );
    let _ = write!(out, "\nTasks:\n{}", task_list(state));
    out
}

/// Progress line for an event, if it is worth showing.
pub fn event_line(event: &Event) -> Option<String> {
    match event {
        Event::RunStarted { thread_id, objective } => {
            Some(format!("▶ {thread_id}: {objective}"))
        }
        Event::RunResumed { thread_id, last_node } => Some(format!(
            "▶ resuming {thread_id} after {}",
            last_node.as_deref().unwrap_or("start")
        )),
        Event::PhaseEntered { phase, .. } => Some(format!("\x1b[90m  → {phase}\x1b[0m")),
        Event::TaskCreated { directive, .. } => Some(format!("  + task: {directive}")),
        Event::TaskVerified {
            accepted,
            confidence,
            ..
        } => Some(if *accepted {
            format!("  ✅ verified ({confidence}%)")
        } else {
            format!("  ❌ rejected ({confidence}%)")
        }),
        Event::RetryScheduled { source, retry, .. } => {
            Some(format!("  ↻ retry {retry} ({source})"))
        }
        _ => None,
    }
}
