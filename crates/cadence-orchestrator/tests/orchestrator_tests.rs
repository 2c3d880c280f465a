#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use cadence_config::CadenceConfig;
    use cadence_core::{CadenceError, Event, EventBus, Result, Role};
    use cadence_llm::{LlmProvider, MockEmbedding, MockProvider, MockResponse};
    use cadence_memory::{
        CheckpointRecord, CheckpointStore, InMemoryBackend, InMemoryCheckpointStore, MemoryAccess,
        MemoryAccessConfig,
    };
    use cadence_orchestrator::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Executor that replays scripted outcomes, then fails.
    #[derive(Default)]
    struct ScriptedExecutor {
        script: Mutex<VecDeque<Result<StepOutcome>>>,
    }

    impl ScriptedExecutor {
        fn new(outcomes: Vec<Result<StepOutcome>>) -> Self {
            Self {
                script: Mutex::new(outcomes.into()),
            }
        }
    }

    #[async_trait]
    impl TaskExecutor for ScriptedExecutor {
        async fn run(&self, task: &Task, step_number: u32, _: &RunState) -> Result<StepOutcome> {
            let next = self.script.lock().unwrap().pop_front();
            let mut outcome = next.unwrap_or_else(|| Err(CadenceError::Orchestration("script exhausted".into())))?;
            outcome.step.number = step_number;
            outcome.step.description = task.directive.clone();
            Ok(outcome)
        }
    }

    fn step_outcome(status: ExecutionStatus, text: &str) -> StepOutcome {
        StepOutcome {
            status,
            step: Step {
                number: 0,
                name: "scripted".into(),
                description: String::new(),
                kind: StepKind::Cognitive,
                tool_invocations: vec![],
                message: Some(text.into()),
                status: StepStatus::Completed,
                result: Some(text.into()),
            },
            message: Some(text.into()),
            tool_results: vec![],
            skip_to: None,
        }
    }

    fn create(directive: &str) -> MockResponse {
        MockResponse::tool_calls(vec![("create_task", json!({"directive": directive}))])
    }

    fn end(summary: &str) -> MockResponse {
        MockResponse::tool_calls(vec![("end_orchestration", json!({"summary": summary}))])
    }

    fn accept() -> MockResponse {
        MockResponse::structured(json!({
            "is_complete": true,
            "confidence": 92,
            "reasoning": "the report answers the question",
            "missing_elements": [],
            "next_actions": []
        }))
    }

    fn reject() -> MockResponse {
        MockResponse::structured(json!({
            "is_complete": false,
            "confidence": 40,
            "reasoning": "the report is a stub",
            "missing_elements": ["sources"],
            "next_actions": []
        }))
    }

    struct Harness {
        mock: Arc<MockProvider>,
        backend: Arc<InMemoryBackend>,
        checkpoints: Arc<InMemoryCheckpointStore>,
        orchestrator: Orchestrator,
    }

    fn harness_with(
        responses: Vec<MockResponse>,
        executor: Option<Arc<dyn TaskExecutor>>,
        config: CadenceConfig,
    ) -> Harness {
        let mut mock = MockProvider::new("mock");
        for response in responses {
            mock = mock.with_mock_response(response);
        }
        let mock = Arc::new(mock);
        let llm: Arc<dyn LlmProvider> = mock.clone();

        let backend = Arc::new(InMemoryBackend::new());
        let memory = MemoryAccess::new(
            backend.clone(),
            Arc::new(MockEmbedding::new(64)),
            // bag-of-words similarity is low; recall everything
            MemoryAccessConfig {
                similarity_threshold: 0.0,
                ..Default::default()
            },
        )
        .expect("memory access");
        let consolidator = Arc::new(StoreConsolidator::new(memory, 5));
        let executor: Arc<dyn TaskExecutor> = match executor {
            Some(executor) => executor,
            None => Arc::new(CognitiveExecutor::new(
                llm.clone(),
                config.agent.clone(),
                Default::default(),
            )),
        };
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());

        let orchestrator =
            Orchestrator::new(llm, executor, consolidator, checkpoints.clone(), &config);
        Harness {
            mock,
            backend,
            checkpoints,
            orchestrator,
        }
    }

    fn harness(responses: Vec<MockResponse>) -> Harness {
        harness_with(responses, None, CadenceConfig::default())
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
        let mut events = vec![];
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    mod happy_path {
        use super::*;

        #[tokio::test]
        async fn test_single_task_run_completes() {
            let h = harness(vec![
                create("research X"),
                MockResponse::text("X is a systems language created in 2010."),
                accept(),
                end("X has been researched"),
            ]);

            let outcome = h
                .orchestrator
                .run(RunRequest::new("research X", "user-1").with_thread("thread-happy"))
                .await
                .unwrap();

            assert_eq!(outcome.thread_id, "thread-happy");
            assert_eq!(outcome.termination.reason, TerminationReason::Completed);
            assert_eq!(outcome.termination.message, "X has been researched");
            assert!(outcome.termination.error.is_none());
            // planner, consolidator, executor, verifier, consolidator, planner
            assert_eq!(outcome.transitions, 6);
            assert_eq!(h.mock.remaining(), 0);

            let task = &outcome.state.tasks[0];
            assert_eq!(outcome.state.tasks.len(), 1);
            assert_eq!(task.status, TaskStatus::Completed);
            assert_eq!(task.steps.len(), 1);
            assert!(task.consolidated);
            assert_eq!(outcome.state.retry, 0);

            let last = outcome.state.messages.last().unwrap();
            assert_eq!(last.role, Role::System);
            assert_eq!(
                last.text_content(),
                "[terminated:completed] X has been researched"
            );
        }

        #[tokio::test]
        async fn test_outcome_is_consolidated_into_memory() {
            let h = harness(vec![
                create("research X"),
                MockResponse::text("X is a systems language."),
                accept(),
                end("done"),
            ]);
            let outcome = h
                .orchestrator
                .run(RunRequest::new("research X", "user-1"))
                .await
                .unwrap();

            let episodic = h.backend.episodic();
            assert_eq!(episodic.len(), 1);
            assert!(episodic[0].content.starts_with("Task: research X\nOutcome: completed"));
            assert!(episodic[0].sources.contains(&outcome.thread_id));
            assert_eq!(episodic[0].user_id, "user-1");

            let semantic = h.backend.semantic();
            assert_eq!(semantic.len(), 1);
            assert_eq!(semantic[0].category, "task_outcome");
            assert_eq!(semantic[0].source_event_ids, vec![episodic[0].id]);
            assert!((semantic[0].confidence - 0.92).abs() < 1e-6);

            // The final planning call saw the recalled memory.
            let last_plan = h.mock.recorded_requests().last().unwrap().messages[0].text_content();
            assert!(last_plan.contains("Relevant memories:"));
        }

        #[tokio::test]
        async fn test_checkpoint_records_termination() {
            let h = harness(vec![create("research X"), MockResponse::text("done"), accept(), end("ok")]);
            let outcome = h
                .orchestrator
                .run(RunRequest::new("research X", "user-1"))
                .await
                .unwrap();

            let checkpoint = h
                .orchestrator
                .load_checkpoint(&outcome.thread_id)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(checkpoint.user_request, "research X");
            assert_eq!(checkpoint.user_id, "user-1");
            assert_eq!(checkpoint.transitions, outcome.transitions);
            assert_eq!(
                checkpoint.termination.map(|t| t.reason),
                Some(TerminationReason::Completed)
            );
            assert_eq!(h.checkpoints.list_threads().await.unwrap(), vec![outcome.thread_id]);
        }

        #[tokio::test]
        async fn test_events_follow_the_run() {
            let h = harness(vec![create("research X"), MockResponse::text("done"), accept(), end("ok")]);
            let bus = EventBus::new(256);
            let mut rx = bus.subscribe();
            let orchestrator = h.orchestrator.with_events(bus);

            orchestrator
                .run(RunRequest::new("research X", "user-1"))
                .await
                .unwrap();

            let events = drain(&mut rx);
            assert!(matches!(events.first(), Some(Event::RunStarted { .. })));
            assert!(matches!(events.last(), Some(Event::RunTerminated { reason, .. }) if reason == "completed"));
            let count = |pred: fn(&Event) -> bool| events.iter().filter(|e| pred(e)).count();
            assert_eq!(count(|e| matches!(e, Event::TaskCreated { .. })), 1);
            assert_eq!(count(|e| matches!(e, Event::StepRecorded { .. })), 1);
            assert_eq!(count(|e| matches!(e, Event::TaskVerified { accepted: true, .. })), 1);
            assert_eq!(count(|e| matches!(e, Event::MemoryConsolidated { .. })), 1);
            assert_eq!(count(|e| matches!(e, Event::PhaseEntered { .. })), 6);
            // one save per phase plus the termination save
            assert_eq!(count(|e| matches!(e, Event::CheckpointSaved { .. })), 7);
        }
    }

    mod failure_paths {
        use super::*;

        #[tokio::test]
        async fn test_rejected_task_is_replanned_with_context() {
            let h = harness(vec![
                create("research X"),
                MockResponse::text("stub"),
                reject(),
                create("research X with sources"),
                MockResponse::text("X, with three cited sources."),
                accept(),
                end("done"),
            ]);
            let outcome = h
                .orchestrator
                .run(RunRequest::new("research X", "user-1"))
                .await
                .unwrap();

            assert_eq!(outcome.termination.reason, TerminationReason::Completed);
            let statuses: Vec<TaskStatus> = outcome.state.tasks.iter().map(|t| t.status).collect();
            assert_eq!(statuses, vec![TaskStatus::Failed, TaskStatus::Completed]);
            assert_eq!(outcome.state.retry, 0);

            let replan = h.mock.recorded_requests()[2].messages[0].text_content();
            assert!(replan.contains("[failed] research X"));
            assert!(replan.contains("Last failure (validation_error)"));

            // failed task: episodic only; completed task: episodic + semantic
            assert_eq!(h.backend.episodic().len(), 2);
            assert_eq!(h.backend.semantic().len(), 1);
        }

        #[tokio::test]
        async fn test_repeated_rejection_hits_retry_limit() {
            let h = harness(vec![
                create("a"),
                MockResponse::text("stub"),
                reject(),
                create("b"),
                MockResponse::text("stub"),
                reject(),
                create("c"),
                MockResponse::text("stub"),
                reject(),
            ]);
            let outcome = h
                .orchestrator
                .run(RunRequest::new("research X", "user-1"))
                .await
                .unwrap();

            assert_eq!(outcome.termination.reason, TerminationReason::RetryLimit);
            let error = outcome.termination.error.expect("error");
            assert_eq!(error.kind, ErrorKind::ValidationError);
            assert_eq!(outcome.state.tasks.len(), 3);
            assert_eq!(outcome.state.retry, 3);
        }

        #[tokio::test]
        async fn test_planner_without_action_hits_retry_limit() {
            let h = harness(vec![
                MockResponse::text("hmm"),
                MockResponse::text("hmm"),
                MockResponse::text("hmm"),
            ]);
            let outcome = h
                .orchestrator
                .run(RunRequest::new("research X", "user-1"))
                .await
                .unwrap();

            assert_eq!(outcome.termination.reason, TerminationReason::RetryLimit);
            assert_eq!(outcome.transitions, 1);
            assert_eq!(h.mock.recorded_requests().len(), 3);
            assert!(outcome.state.tasks.is_empty());
        }

        #[tokio::test]
        async fn test_block_task_terminates_with_error() {
            let h = harness(vec![MockResponse::tool_calls(vec![(
                "block_task",
                json!({"reason": "needs credentials"}),
            )])]);
            let outcome = h
                .orchestrator
                .run(RunRequest::new("research X", "user-1"))
                .await
                .unwrap();

            assert_eq!(outcome.termination.reason, TerminationReason::Error);
            assert!(outcome.termination.message.contains("needs credentials"));
            assert_eq!(
                outcome.termination.error.map(|e| e.kind),
                Some(ErrorKind::TaskAborted)
            );
        }

        #[tokio::test]
        async fn test_blocked_execution_replans() {
            let executor: Arc<dyn TaskExecutor> = Arc::new(ScriptedExecutor::new(vec![
                Ok(step_outcome(ExecutionStatus::Blocked, "the API is down")),
                Ok(step_outcome(ExecutionStatus::AwaitingVerification, "done another way")),
            ]));
            let h = harness_with(
                vec![create("call the API"), create("use the cache"), accept(), end("ok")],
                Some(executor),
                CadenceConfig::default(),
            );
            let bus = EventBus::default();
            let mut rx = bus.subscribe();
            let orchestrator = h.orchestrator.with_events(bus);

            let outcome = orchestrator
                .run(RunRequest::new("research X", "user-1"))
                .await
                .unwrap();

            assert_eq!(outcome.termination.reason, TerminationReason::Completed);
            assert_eq!(outcome.state.tasks.len(), 2);
            assert_eq!(outcome.state.tasks[0].status, TaskStatus::Pending);
            assert_eq!(outcome.state.tasks[1].status, TaskStatus::Completed);
            assert!(drain(&mut rx).iter().any(|e| matches!(
                e,
                Event::RetryScheduled { source, retry: 1, .. } if source == "task_executor"
            )));
        }

        #[tokio::test]
        async fn test_executor_error_is_terminal() {
            let executor: Arc<dyn TaskExecutor> = Arc::new(ScriptedExecutor::default());
            let h = harness_with(vec![create("research X")], Some(executor), CadenceConfig::default());
            let outcome = h
                .orchestrator
                .run(RunRequest::new("research X", "user-1"))
                .await
                .unwrap();

            assert_eq!(outcome.termination.reason, TerminationReason::Error);
            assert_eq!(
                outcome.termination.error.map(|e| e.kind),
                Some(ErrorKind::ExecutionError)
            );
        }

        #[tokio::test]
        async fn test_unknown_skip_target_ends_run() {
            let mut skipping = step_outcome(ExecutionStatus::Completed, "partial");
            skipping.skip_to = Some("somewhere_else".into());
            let executor: Arc<dyn TaskExecutor> = Arc::new(ScriptedExecutor::new(vec![Ok(skipping)]));
            let h = harness_with(vec![create("research X")], Some(executor), CadenceConfig::default());

            let outcome = h
                .orchestrator
                .run(RunRequest::new("research X", "user-1"))
                .await
                .unwrap();

            assert_eq!(outcome.termination.reason, TerminationReason::Directive);
            assert!(outcome.termination.message.contains("somewhere_else"));
            assert!(outcome.state.skip_validation.is_none());
        }

        #[tokio::test]
        async fn test_skip_directive_is_honoured_once() {
            let mut skipping = step_outcome(ExecutionStatus::Completed, "partial");
            skipping.skip_to = Some("task_planner".into());
            let executor: Arc<dyn TaskExecutor> = Arc::new(ScriptedExecutor::new(vec![Ok(skipping)]));
            let h = harness_with(
                vec![create("research X"), end("enough")],
                Some(executor),
                CadenceConfig::default(),
            );

            let outcome = h
                .orchestrator
                .run(RunRequest::new("research X", "user-1"))
                .await
                .unwrap();

            assert_eq!(outcome.termination.reason, TerminationReason::Completed);
            assert!(outcome.state.skip_validation.is_none());
            // planner, consolidator, executor, planner
            assert_eq!(outcome.transitions, 4);
        }
    }

    mod limits {
        use super::*;

        #[tokio::test]
        async fn test_transition_limit() {
            let mut config = CadenceConfig::default();
            config.orchestrator.max_transitions = 3;
            let h = harness_with(
                vec![create("research X"), MockResponse::text("done")],
                None,
                config,
            );

            let outcome = h
                .orchestrator
                .run(RunRequest::new("research X", "user-1"))
                .await
                .unwrap();

            assert_eq!(outcome.termination.reason, TerminationReason::TransitionLimit);
            assert_eq!(outcome.transitions, 3);
            assert_eq!(
                outcome.termination.error.map(|e| e.kind),
                Some(ErrorKind::TransitionLimit)
            );
        }

        #[tokio::test]
        async fn test_step_limit() {
            let mut config = CadenceConfig::default();
            config.orchestrator.max_steps = 1;
            let h = harness_with(
                vec![create("a"), MockResponse::text("done"), accept()],
                None,
                config,
            );

            let outcome = h
                .orchestrator
                .run(RunRequest::new("research X", "user-1"))
                .await
                .unwrap();

            assert_eq!(outcome.termination.reason, TerminationReason::Error);
            assert_eq!(
                outcome.termination.error.map(|e| e.kind),
                Some(ErrorKind::StepLimitExceeded)
            );
            assert_eq!(outcome.state.tasks.len(), 1);
        }

        #[tokio::test]
        async fn test_negative_memory_size_is_rejected() {
            let mut config = CadenceConfig::default();
            config.memory.size_limits.short_term_memory_size = -1;
            let h = harness_with(vec![], None, config);

            let err = h
                .orchestrator
                .run(RunRequest::new("research X", "user-1"))
                .await
                .unwrap_err();

            assert!(matches!(err, CadenceError::ConfigValidation { .. }));
            assert!(h.mock.recorded_requests().is_empty());
        }
    }

    mod resume {
        use super::*;

        #[tokio::test]
        async fn test_terminated_thread_returns_recorded_outcome() {
            let h = harness(vec![create("research X"), MockResponse::text("done"), accept(), end("ok")]);
            let first = h
                .orchestrator
                .run(RunRequest::new("research X", "user-1"))
                .await
                .unwrap();
            let calls = h.mock.recorded_requests().len();

            let again = h.orchestrator.resume(&first.thread_id).await.unwrap();

            assert_eq!(again.termination.reason, TerminationReason::Completed);
            assert_eq!(again.transitions, first.transitions);
            assert_eq!(h.mock.recorded_requests().len(), calls);
        }

        #[tokio::test]
        async fn test_resume_routes_from_last_node() {
            let h = harness(vec![accept(), end("verified and done")]);

            let mut state = RunState::new("research X");
            let mut task = Task::new("research X", "");
            task.status = TaskStatus::AwaitingVerification;
            state.active_task_id = Some(task.id);
            state.tasks.push(task);
            state.last_node = Some(Node::TaskExecutor);
            state.step_count = 1;
            let checkpoint = Checkpoint {
                thread_id: "thread-resume".into(),
                agent_config: Default::default(),
                user_id: "user-1".into(),
                user_request: "research X".into(),
                run_state: state,
                transitions: 3,
                termination: None,
                updated_at: chrono::Utc::now(),
            };
            h.checkpoints
                .save(&CheckpointRecord {
                    thread_id: checkpoint.thread_id.clone(),
                    payload: serde_json::to_value(&checkpoint).unwrap(),
                    updated_at: checkpoint.updated_at,
                })
                .await
                .unwrap();

            let outcome = h.orchestrator.resume("thread-resume").await.unwrap();

            assert_eq!(outcome.termination.reason, TerminationReason::Completed);
            assert_eq!(h.mock.recorded_structured().len(), 1);
            assert_eq!(outcome.state.tasks[0].status, TaskStatus::Completed);
            // verifier, consolidator, planner on top of the recorded three
            assert_eq!(outcome.transitions, 6);
        }

        #[tokio::test]
        async fn test_unknown_thread() {
            let h = harness(vec![]);
            let err = h.orchestrator.resume("thread-missing").await.unwrap_err();
            assert!(matches!(err, CadenceError::Checkpoint(_)));
        }

        #[tokio::test]
        async fn test_existing_thread_cannot_be_rerun() {
            let h = harness(vec![end("nothing to do"), end("nothing to do")]);
            h.orchestrator
                .run(RunRequest::new("research X", "user-1").with_thread("thread-dup"))
                .await
                .unwrap();

            let err = h
                .orchestrator
                .run(RunRequest::new("research X", "user-1").with_thread("thread-dup"))
                .await
                .unwrap_err();
            assert!(matches!(err, CadenceError::Orchestration(_)));
        }

        #[tokio::test]
        async fn test_concurrent_runs_on_distinct_threads() {
            let h = harness(vec![end("a"), end("b")]);
            let orchestrator = Arc::new(h.orchestrator);

            let (a, b) = tokio::join!(
                orchestrator.run(RunRequest::new("first", "user-1").with_thread("thread-a")),
                orchestrator.run(RunRequest::new("second", "user-2").with_thread("thread-b")),
            );

            assert_eq!(a.unwrap().termination.reason, TerminationReason::Completed);
            assert_eq!(b.unwrap().termination.reason, TerminationReason::Completed);
            assert_eq!(h.checkpoints.list_threads().await.unwrap().len(), 2);
        }
    }
}
