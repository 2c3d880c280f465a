#[cfg(test)]
mod tests {
    use cadence_config::OrchestratorConfig;
    use cadence_orchestrator::*;

    fn state_with_task(status: TaskStatus, last_node: Option<Node>) -> RunState {
        let mut state = RunState::new("research X");
        let mut task = Task::new("research X", "nothing is known yet");
        task.status = status;
        state.active_task_id = Some(task.id);
        state.tasks.push(task);
        state.last_node = last_node;
        state
    }

    fn config() -> OrchestratorConfig {
        OrchestratorConfig::default()
    }

    mod table {
        use super::*;

        #[test]
        fn test_rule_order() {
            let names: Vec<&str> = RULES.iter().map(|r| r.name).collect();
            assert_eq!(
                names,
                vec![
                    "terminal_error",
                    "skip_validation",
                    "verified_task",
                    "after_consolidation",
                    "after_execution",
                    "after_planning",
                    "default",
                ]
            );
        }

        #[test]
        fn test_fresh_state_falls_through_to_default() {
            let state = RunState::new("research X");
            assert_eq!(explain(&state, &config()), (Route::TaskExecutor, "default"));
        }

        #[test]
        fn test_route_matches_explain() {
            let state = state_with_task(TaskStatus::Pending, Some(Node::TaskPlanner));
            assert_eq!(route(&state, &config()), explain(&state, &config()).0);
        }
    }

    mod errors {
        use super::*;

        #[test]
        fn test_active_error_ends_run() {
            let mut state = state_with_task(TaskStatus::Pending, Some(Node::TaskPlanner));
            state.fail(ErrorKind::TaskAborted, "task_planner", "cannot continue");
            assert_eq!(explain(&state, &config()), (Route::End, "terminal_error"));
        }

        #[test]
        fn test_blocked_task_replans() {
            let mut state = state_with_task(TaskStatus::Pending, Some(Node::TaskExecutor));
            state.retry = 1;
            state.fail(ErrorKind::BlockedTask, "task_executor", "missing credentials");
            assert_eq!(explain(&state, &config()), (Route::TaskPlanner, "after_execution"));
        }

        #[test]
        fn test_blocked_task_at_ceiling_ends_run() {
            let mut state = state_with_task(TaskStatus::Pending, Some(Node::TaskExecutor));
            state.retry = 3;
            state.fail(ErrorKind::BlockedTask, "task_executor", "missing credentials");
            assert_eq!(route(&state, &config()), Route::End);
        }

        #[test]
        fn test_informational_error_does_not_end_run() {
            let mut state = state_with_task(TaskStatus::Failed, Some(Node::UpdateTask));
            state.error = Some(ErrorRecord::informational(
                ErrorKind::ValidationError,
                "task_verifier",
                "not done",
            ));
            assert_eq!(route(&state, &config()), Route::MemoryConsolidator);
        }
    }

    mod skip {
        use super::*;

        #[test]
        fn test_known_target() {
            let mut state = state_with_task(TaskStatus::Pending, Some(Node::TaskExecutor));
            state.skip_validation = Some("task_verifier".into());
            assert_eq!(explain(&state, &config()), (Route::TaskVerifier, "skip_validation"));
        }

        #[test]
        fn test_unknown_target_ends_run() {
            let mut state = state_with_task(TaskStatus::Pending, Some(Node::TaskExecutor));
            state.skip_validation = Some("somewhere_else".into());
            assert_eq!(route(&state, &config()), Route::End);
        }

        #[test]
        fn test_end_is_not_a_target() {
            assert_eq!(Route::from_target("end"), None);
            assert_eq!(Route::from_target("memory_consolidator"), Some(Route::MemoryConsolidator));
        }
    }

    mod phases {
        use super::*;

        #[test]
        fn test_awaiting_task_goes_to_verifier() {
            let state = state_with_task(TaskStatus::AwaitingVerification, Some(Node::TaskExecutor));
            assert_eq!(route(&state, &config()), Route::TaskVerifier);
        }

        #[test]
        fn test_unfinished_step_goes_to_consolidator() {
            let state = state_with_task(TaskStatus::Pending, Some(Node::TaskExecutor));
            assert_eq!(route(&state, &config()), Route::MemoryConsolidator);
        }

        #[test]
        fn test_verified_task_is_consolidated() {
            for status in [TaskStatus::Completed, TaskStatus::Failed] {
                let state = state_with_task(status, Some(Node::UpdateTask));
                assert_eq!(explain(&state, &config()), (Route::MemoryConsolidator, "verified_task"));
            }
        }

        #[test]
        fn test_after_consolidation() {
            let finished = state_with_task(TaskStatus::Completed, Some(Node::MemoryConsolidator));
            assert_eq!(route(&finished, &config()), Route::TaskPlanner);

            let pending = state_with_task(TaskStatus::Pending, Some(Node::MemoryConsolidator));
            assert_eq!(route(&pending, &config()), Route::TaskExecutor);

            let mut empty = RunState::new("research X");
            empty.last_node = Some(Node::MemoryConsolidator);
            assert_eq!(route(&empty, &config()), Route::TaskPlanner);
        }

        #[test]
        fn test_after_planning() {
            let state = state_with_task(TaskStatus::Pending, Some(Node::TaskPlanner));
            assert_eq!(explain(&state, &config()), (Route::MemoryConsolidator, "after_planning"));
        }

        #[test]
        fn test_skipped_verification_returns_to_executor() {
            let state = state_with_task(TaskStatus::Pending, Some(Node::VerifyTask));
            assert_eq!(route(&state, &config()), Route::TaskExecutor);
        }
    }
}
