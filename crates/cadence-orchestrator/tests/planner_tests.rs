#[cfg(test)]
mod tests {
    use cadence_config::{AgentConfig, OrchestratorConfig};
    use cadence_llm::{LlmProvider, MockProvider, MockResponse, UsageMeter};
    use cadence_orchestrator::*;
    use serde_json::json;
    use std::sync::Arc;

    fn ctx() -> RunContext {
        RunContext {
            thread_id: "thread-test".into(),
            user_id: "user-1".into(),
            objective: "research X".into(),
            agent: AgentConfig::default(),
        }
    }

    fn planner(mock: &Arc<MockProvider>) -> TaskPlanner {
        let llm: Arc<dyn LlmProvider> = mock.clone();
        TaskPlanner::new(llm, UsageMeter::new())
    }

    fn prompt_of(mock: &MockProvider, index: usize) -> String {
        mock.recorded_requests()[index].messages[0].text_content()
    }

    mod create {
        use super::*;

        #[tokio::test]
        async fn test_first_task_is_created_pending() {
            let mock = Arc::new(MockProvider::new("mock").with_tool_call(
                "create_task",
                json!({"directive": "research X", "reasoning": "nothing is known yet"}),
            ));
            let mut state = RunState::new("research X");

            let outcome = planner(&mock)
                .plan(&mut state, &ctx(), &OrchestratorConfig::default())
                .await;

            let PlannerOutcome::Created(id) = outcome else {
                panic!("expected a task, got {outcome:?}");
            };
            assert_eq!(state.tasks.len(), 1);
            assert_eq!(state.tasks[0].directive, "research X");
            assert_eq!(state.tasks[0].reasoning, "nothing is known yet");
            assert_eq!(state.tasks[0].status, TaskStatus::Pending);
            assert_eq!(state.active_task_id, Some(id));
            assert_eq!(state.step_count, 1);
            assert!(state.error.is_none());
            assert_eq!(state.last_node, Some(Node::TaskPlanner));
        }

        #[tokio::test]
        async fn test_request_binds_three_actions() {
            let mock = Arc::new(
                MockProvider::new("mock").with_tool_call("create_task", json!({"directive": "research X"})),
            );
            let mut state = RunState::new("research X");
            planner(&mock)
                .plan(&mut state, &ctx(), &OrchestratorConfig::default())
                .await;

            let request = &mock.recorded_requests()[0];
            assert!(request.require_tool);
            let names: Vec<&str> = request.tools.iter().map(|t| t.name.as_str()).collect();
            assert_eq!(names, vec!["create_task", "block_task", "end_orchestration"]);
            let system = request.system.as_deref().unwrap_or_default();
            assert!(system.contains("cadence"));
            let prompt = prompt_of(&mock, 0);
            assert!(prompt.contains("Objective: research X"));
            assert!(prompt.contains("(none)"));
        }

        #[tokio::test]
        async fn test_prompt_carries_history_failure_and_memories() {
            let mock = Arc::new(
                MockProvider::new("mock").with_tool_call("create_task", json!({"directive": "dig deeper"})),
            );
            let mut state = RunState::new("research X");
            let mut earlier = Task::new("skim sources", "");
            earlier.status = TaskStatus::Failed;
            earlier.verification = Some("only one source was read".into());
            state.tasks.push(earlier);
            state.error = Some(ErrorRecord::informational(
                ErrorKind::ValidationError,
                "task_verifier",
                "task 'skim sources' failed verification",
            ));
            state.rag_context = "- [m1] (0.91) X was researched before".into();

            planner(&mock)
                .plan(&mut state, &ctx(), &OrchestratorConfig::default())
                .await;

            let prompt = prompt_of(&mock, 0);
            assert!(prompt.contains("1. [failed] skim sources (verification: only one source was read)"));
            assert!(prompt.contains("Last failure (validation_error)"));
            assert!(prompt.contains("X was researched before"));
            assert_eq!(state.tasks.len(), 2);
            assert!(state.error.is_none());
        }

        #[tokio::test]
        async fn test_usage_is_metered() {
            let mock = Arc::new(
                MockProvider::new("mock").with_tool_call("create_task", json!({"directive": "research X"})),
            );
            let llm: Arc<dyn LlmProvider> = mock.clone();
            let meter = UsageMeter::new();
            let mut state = RunState::new("research X");
            TaskPlanner::new(llm, meter.clone())
                .plan(&mut state, &ctx(), &OrchestratorConfig::default())
                .await;

            let snapshot = meter.snapshot();
            assert_eq!(snapshot.calls, 1);
            assert!(snapshot.by_phase.contains_key("task_planner"));
        }
    }

    mod rejected {
        use super::*;

        async fn plan_with(response: MockResponse) -> (PlannerOutcome, RunState) {
            let mock = Arc::new(MockProvider::new("mock").with_mock_response(response));
            let mut state = RunState::new("research X");
            let outcome = planner(&mock)
                .plan(&mut state, &ctx(), &OrchestratorConfig::default())
                .await;
            (outcome, state)
        }

        #[tokio::test]
        async fn test_no_action_is_retried() {
            let (outcome, state) = plan_with(MockResponse::text("I think we should research X")).await;
            assert_eq!(outcome, PlannerOutcome::NoTask);
            assert!(state.tasks.is_empty());
            assert_eq!(state.retry, 1);
            let error = state.active_error().expect("error");
            assert_eq!(error.kind, ErrorKind::WrongActionCount);
            assert_eq!(planner_route(&state, &OrchestratorConfig::default()), PlannerRoute::Retry);
        }

        #[tokio::test]
        async fn test_two_actions_are_retried() {
            let (outcome, state) = plan_with(MockResponse::tool_calls(vec![
                ("create_task", json!({"directive": "a"})),
                ("create_task", json!({"directive": "b"})),
            ]))
            .await;
            assert_eq!(outcome, PlannerOutcome::NoTask);
            assert!(state.tasks.is_empty());
            assert_eq!(state.retry, 1);
            assert_eq!(state.active_error().map(|e| e.kind), Some(ErrorKind::WrongActionCount));
        }

        #[tokio::test]
        async fn test_unknown_action_is_retried() {
            let (_, state) =
                plan_with(MockResponse::tool_calls(vec![("launch_rocket", json!({}))])).await;
            assert!(state.tasks.is_empty());
            assert_eq!(state.retry, 1);
            assert_eq!(state.active_error().map(|e| e.kind), Some(ErrorKind::UnrecognizedAction));
        }

        #[tokio::test]
        async fn test_create_without_directive_is_unrecognized() {
            let (_, state) = plan_with(MockResponse::tool_calls(vec![(
                "create_task",
                json!({"directive": "   ", "reasoning": "hm"}),
            )]))
            .await;
            assert!(state.tasks.is_empty());
            assert_eq!(state.active_error().map(|e| e.kind), Some(ErrorKind::UnrecognizedAction));
        }

        #[tokio::test]
        async fn test_block_aborts() {
            let (outcome, state) = plan_with(MockResponse::tool_calls(vec![(
                "block_task",
                json!({"reason": "objective is unsafe"}),
            )]))
            .await;
            assert_eq!(outcome, PlannerOutcome::NoTask);
            assert_eq!(state.retry, 0);
            let error = state.active_error().expect("error");
            assert_eq!(error.kind, ErrorKind::TaskAborted);
            assert!(error.message.contains("objective is unsafe"));
            assert_eq!(planner_route(&state, &OrchestratorConfig::default()), PlannerRoute::Exit);
            assert_eq!(route(&state, &OrchestratorConfig::default()), Route::End);
        }

        #[tokio::test]
        async fn test_end_orchestration() {
            let (outcome, state) = plan_with(MockResponse::tool_calls(vec![(
                "end_orchestration",
                json!({"summary": "X is researched"}),
            )]))
            .await;
            assert_eq!(
                outcome,
                PlannerOutcome::End {
                    summary: "X is researched".into()
                }
            );
            assert!(state.tasks.is_empty());
            assert!(state.error.is_none());
        }

        #[tokio::test]
        async fn test_model_failure_is_manager_error() {
            let (_, state) = plan_with(MockResponse::error("connection reset")).await;
            let error = state.active_error().expect("error");
            assert_eq!(error.kind, ErrorKind::ManagerError);
            assert!(error.message.contains("connection reset"));
            assert_eq!(state.retry, 0);
        }
    }

    mod guards {
        use super::*;

        #[tokio::test]
        async fn test_step_ceiling_skips_model_call() {
            let mock = Arc::new(MockProvider::new("mock"));
            let config = OrchestratorConfig {
                max_steps: 2,
                ..Default::default()
            };
            let mut state = RunState::new("research X");
            state.step_count = 2;

            let outcome = planner(&mock).plan(&mut state, &ctx(), &config).await;

            assert_eq!(outcome, PlannerOutcome::NoTask);
            assert!(mock.recorded_requests().is_empty());
            assert_eq!(state.active_error().map(|e| e.kind), Some(ErrorKind::StepLimitExceeded));
            assert_eq!(route(&state, &config), Route::End);
        }

        #[tokio::test]
        async fn test_missing_model_is_manager_error() {
            let mock = Arc::new(MockProvider::new("mock"));
            let mut ctx = ctx();
            ctx.agent.model = String::new();
            let mut state = RunState::new("research X");

            planner(&mock)
                .plan(&mut state, &ctx, &OrchestratorConfig::default())
                .await;

            assert!(mock.recorded_requests().is_empty());
            let error = state.active_error().expect("error");
            assert_eq!(error.kind, ErrorKind::ManagerError);
            assert!(error.message.contains("agent.model"));
        }

        #[tokio::test]
        async fn test_empty_objective_is_manager_error() {
            let mock = Arc::new(MockProvider::new("mock"));
            let mut ctx = ctx();
            ctx.objective = "  ".into();
            let mut state = RunState::new("");

            planner(&mock)
                .plan(&mut state, &ctx, &OrchestratorConfig::default())
                .await;

            assert_eq!(state.active_error().map(|e| e.kind), Some(ErrorKind::ManagerError));
        }

        #[test]
        fn test_local_route_at_ceiling_ends() {
            let mut state = RunState::new("research X");
            state.retry = 3;
            state.fail(ErrorKind::WrongActionCount, "task_planner", "no action");
            assert_eq!(planner_route(&state, &OrchestratorConfig::default()), PlannerRoute::End);
        }

        #[test]
        fn test_local_route_without_error_exits() {
            let state = RunState::new("research X");
            assert_eq!(planner_route(&state, &OrchestratorConfig::default()), PlannerRoute::Exit);
        }
    }
}
