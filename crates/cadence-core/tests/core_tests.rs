#[cfg(test)]
mod tests {
    use cadence_core::*;

    // ── Message tests ──────────────────────────────────────────

    #[test]
    fn test_message_text_constructor() {
        let msg = Message::text(Role::User, "hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.text_content(), "hello");
        assert!(msg.tool_calls.is_empty());
        assert!(msg.metadata.is_empty());
    }

    #[test]
    fn test_message_text_joins_blocks() {
        let mut msg = Message::text(Role::Assistant, "Hello ");
        msg.content.push(MessageContent::Text { text: "world".to_string() });
        assert_eq!(msg.text_content(), "Hello \nworld");
    }

    #[test]
    fn test_message_text_skips_tool_results() {
        let mut msg = Message::text(Role::Tool, "visible");
        msg.content.push(MessageContent::ToolResult {
            tool_call_id: "call_1".into(),
            content: "hidden".into(),
            is_error: false,
        });
        assert_eq!(msg.text_content(), "visible");
    }

    #[test]
    fn test_message_metadata_builder() {
        let msg = Message::text(Role::System, "note")
            .with_meta("phase", "task_verifier")
            .with_meta("branch", "success");
        assert_eq!(msg.meta_str("phase"), Some("task_verifier"));
        assert_eq!(msg.meta_str("branch"), Some("success"));
        assert_eq!(msg.meta_str("missing"), None);
    }

    #[test]
    fn test_message_serde_roundtrip() {
        let msg = Message::text(Role::User, "test message").with_meta("task_id", "abc");
        let json = serde_json::to_string(&msg).unwrap();
        let restored: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.role, Role::User);
        assert_eq!(restored.text_content(), "test message");
        assert_eq!(restored.meta_str("task_id"), Some("abc"));
    }

    // ── Error tests ────────────────────────────────────────────

    #[test]
    fn test_error_display() {
        let err = CadenceError::Orchestration("something broke".into());
        assert!(err.to_string().contains("something broke"));
    }

    #[test]
    fn test_error_store_timeout() {
        let err = CadenceError::StoreTimeout {
            operation: "upsert".into(),
            timeout_ms: 5000,
        };
        let s = err.to_string();
        assert!(s.contains("upsert"));
        assert!(s.contains("5000"));
    }

    #[test]
    fn test_error_transient_classification() {
        assert!(CadenceError::Memory("disk busy".into()).is_transient());
        assert!(CadenceError::StoreTimeout { operation: "q".into(), timeout_ms: 1 }.is_transient());
        assert!(!CadenceError::Validation("empty".into()).is_transient());
        assert!(!CadenceError::Config("bad".into()).is_transient());
    }

    #[test]
    fn test_llm_status_transient_only_for_throttling_and_server_errors() {
        let status = |status| CadenceError::LlmStatus { status, message: "x".into() };
        assert!(status(429).is_transient());
        assert!(status(503).is_transient());
        assert!(!status(400).is_transient());
        assert!(!status(401).is_transient());
        assert!(status(502).to_string().contains("HTTP 502"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: CadenceError = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    // ── Tool tests ─────────────────────────────────────────────

    #[test]
    fn test_tool_call_str_arg() {
        let tc = ToolCall {
            id: "call_123".into(),
            tool_name: "create_task".into(),
            arguments: serde_json::json!({"directive": "  research X ", "reasoning": "   "}),
        };
        assert_eq!(tc.str_arg("directive"), Some("research X"));
        assert_eq!(tc.str_arg("reasoning"), None);
        assert_eq!(tc.str_arg("missing"), None);
    }

    #[test]
    fn test_tool_result_serde() {
        let tr = ToolResult {
            tool_call_id: "call_123".into(),
            content: "file contents".into(),
            is_error: false,
            data: Some(serde_json::json!({"lines": 42})),
        };
        let json = serde_json::to_string(&tr).unwrap();
        let restored: ToolResult = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.content, "file contents");
        assert!(!restored.is_error);
    }

    // ── Event Bus tests ────────────────────────────────────────

    #[test]
    fn test_event_bus_pub_sub() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(Event::RunStarted {
            thread_id: "t1".into(),
            objective: "research X".into(),
        });

        let event = rx.try_recv().unwrap();
        assert!(matches!(event, Event::RunStarted { .. }));
    }

    #[test]
    fn test_event_bus_without_subscribers_does_not_fail() {
        let bus = EventBus::new(4);
        bus.publish(Event::CheckpointSaved {
            thread_id: "t1".into(),
            transitions: 1,
        });
    }

    #[test]
    fn test_event_serde_tag() {
        let event = Event::TaskVerified {
            thread_id: "t1".into(),
            task_id: uuid::Uuid::new_v4(),
            accepted: true,
            confidence: 88,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "task_verified");
        assert_eq!(json["confidence"], 88);
    }

    #[test]
    fn test_new_thread_id_is_unique() {
        assert_ne!(new_thread_id(), new_thread_id());
        assert!(new_thread_id().starts_with("thread-"));
    }
}
