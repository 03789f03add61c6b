//! Runner 端到端测试：组合智能体、事件流、取消与检查点恢复

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use hive::checkpoint::{FileCheckpointStore, InMemoryCheckpointStore, RunCheckpoint};
    use hive::llm::{LlmError, ScriptedLlmClient};
    use hive::tools::EXIT_TOOL_NAME;
    use hive::{
        Agent, AgentAction, AgentError, AgentEvent, AgentOutcome, ChatModelAgent, CheckpointStore, EventOutput,
        FunctionTool, LoopAgent, Message, ParallelAgent, Role, RunContext, RunOptions, Runner, RunnerConfig,
        SequentialAgent, SessionState, ToolCallRequest, TransferAgent,
    };
    use serde_json::{json, Value};
    use tokio::sync::Notify;
    use tokio_util::sync::CancellationToken;

    fn scripted(replies: &[&str]) -> Arc<ScriptedLlmClient> {
        Arc::new(ScriptedLlmClient::new(
            replies.iter().map(|r| Message::assistant(*r)).collect(),
        ))
    }

    fn leaf(name: &str, model: Arc<ScriptedLlmClient>) -> ChatModelAgent {
        ChatModelAgent::builder(name).model(model).build().unwrap()
    }

    fn calls(items: &[(&str, &str, &str)]) -> Message {
        Message::assistant_with_tools(
            "",
            items
                .iter()
                .map(|(id, name, args)| ToolCallRequest::new(*id, *name, *args))
                .collect(),
        )
    }

    fn last_error(events: &[AgentEvent]) -> &AgentError {
        events.last().and_then(|e| e.err.as_ref()).expect("run should end with an error event")
    }

    async fn load(store: &dyn CheckpointStore, id: &str) -> RunCheckpoint {
        RunCheckpoint::from_bytes(&store.get(id).await.unwrap().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_sequential_renders_state_into_next_instruction() {
        let analyzer = ChatModelAgent::builder("Analyzer")
            .instruction("Extract the requirements.")
            .model(scripted(&["needs i18n and mobile"]))
            .output_key("analysis")
            .build()
            .unwrap();
        let planner_model = scripted(&["plan: use responsive layouts"]);
        let planner = ChatModelAgent::builder("SolutionGenerator")
            .instruction("Write a plan for: {analysis}")
            .model(planner_model.clone())
            .output_key("solution")
            .build()
            .unwrap();
        let workflow = SequentialAgent::new("AnalysisWorkflow", "", vec![Arc::new(analyzer), Arc::new(planner)]).unwrap();

        let events = Runner::new(RunnerConfig::new(Arc::new(workflow)))
            .query(CancellationToken::new(), "online shop")
            .collect_all()
            .await;

        let speakers: Vec<_> = events.iter().map(|e| e.agent_name.as_str()).collect();
        assert_eq!(speakers, vec!["Analyzer", "SolutionGenerator"]);
        assert!(events.iter().all(|e| !e.is_error()));
        assert_eq!(
            planner_model.calls()[0].system_prompt(),
            Some("Write a plan for: needs i18n and mobile")
        );
    }

    #[tokio::test]
    async fn test_parallel_branches_feed_a_summary_step() {
        let branch = |name: &str, reply: &str| -> Arc<dyn Agent> {
            Arc::new(
                ChatModelAgent::builder(name)
                    .model(scripted(&[reply]))
                    .output_key(name)
                    .build()
                    .unwrap(),
            )
        };
        let views = ParallelAgent::new(
            "views",
            "",
            vec![branch("tech", "rust"), branch("cost", "cheap"), branch("risk", "low")],
        )
        .unwrap();
        let summary_model = scripted(&["all good"]);
        let summary = ChatModelAgent::builder("summary")
            .instruction("tech={tech} cost={cost} risk={risk} missing={budget}")
            .model(summary_model.clone())
            .build()
            .unwrap();
        let workflow = SequentialAgent::new("review", "", vec![Arc::new(views), Arc::new(summary)]).unwrap();

        let events = Runner::new(RunnerConfig::new(Arc::new(workflow)))
            .query(CancellationToken::new(), "evaluate")
            .collect_all()
            .await;
        assert_eq!(events.len(), 4);
        assert_eq!(
            summary_model.calls()[0].system_prompt(),
            Some("tech=rust cost=cheap risk=low missing={budget}")
        );
    }

    #[tokio::test]
    async fn test_parallel_same_key_last_writer_wins() {
        let writer = |name: &str, reply: &str, delay_ms: u64| -> Arc<dyn Agent> {
            let model = ScriptedLlmClient::new(vec![Message::assistant(reply)])
                .with_delay(Duration::from_millis(delay_ms));
            Arc::new(
                ChatModelAgent::builder(name)
                    .model(Arc::new(model))
                    .output_key("verdict")
                    .build()
                    .unwrap(),
            )
        };
        let agent = ParallelAgent::new("judges", "", vec![writer("late", "late", 80), writer("early", "early", 0)]).unwrap();
        let (ctx, _events) = RunContext::new(CancellationToken::new(), 16);
        let state = SessionState::new();
        agent
            .run(&ctx.enter("judges"), vec![Message::user("q")], &state)
            .await
            .unwrap();
        assert_eq!(state.get_text("verdict").as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn test_loop_runs_exactly_max_iterations() {
        let model = Arc::new(ScriptedLlmClient::new(vec![]).with_fallback(Message::assistant("again")));
        let agent = LoopAgent::new("repeat", "", vec![Arc::new(leaf("step", model.clone()))], 4).unwrap();
        let events = Runner::new(RunnerConfig::new(Arc::new(agent)))
            .query(CancellationToken::new(), "go")
            .collect_all()
            .await;
        assert_eq!(model.call_count(), 4);
        assert_eq!(events.len(), 4);
    }

    /// 第 n 次调用时发出 BreakLoop 的自定义智能体
    struct BreakAfter {
        limit: usize,
        runs: AtomicUsize,
    }

    #[async_trait]
    impl Agent for BreakAfter {
        fn name(&self) -> &str {
            "checker"
        }

        fn description(&self) -> &str {
            "Stops the loop once enough drafts exist"
        }

        async fn run(
            &self,
            ctx: &RunContext,
            _input: Vec<Message>,
            _state: &SessionState,
        ) -> Result<AgentOutcome, AgentError> {
            let n = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            let msg = Message::assistant(format!("check {n}"));
            if n < self.limit {
                ctx.emit(AgentEvent::message(self.name(), msg.clone())).await?;
                return Ok(AgentOutcome::new(vec![msg]));
            }
            ctx.emit(AgentEvent::message(self.name(), msg.clone()).with_action(AgentAction::BreakLoop))
                .await?;
            Ok(AgentOutcome::new(vec![msg]).with_action(AgentAction::BreakLoop))
        }
    }

    #[tokio::test]
    async fn test_break_loop_passes_through_sequence_and_stops_loop() {
        let writer_model = Arc::new(ScriptedLlmClient::new(vec![]).with_fallback(Message::assistant("draft")));
        let checker = Arc::new(BreakAfter {
            limit: 2,
            runs: AtomicUsize::new(0),
        });
        let steps: Vec<Arc<dyn Agent>> = vec![Arc::new(leaf("writer", writer_model.clone())), checker.clone()];
        let round = SequentialAgent::new("round", "", steps).unwrap();
        let agent = LoopAgent::new("refine", "", vec![Arc::new(round)], 5).unwrap();

        let events = Runner::new(RunnerConfig::new(Arc::new(agent)))
            .query(CancellationToken::new(), "topic")
            .collect_all()
            .await;
        assert_eq!(writer_model.call_count(), 2);
        assert_eq!(checker.runs.load(Ordering::SeqCst), 2);
        assert!(events.iter().all(|e| !e.is_error()));
        assert_eq!(events.last().unwrap().action, Some(AgentAction::BreakLoop));
    }

    #[tokio::test]
    async fn test_exit_tool_ends_enclosing_loop() {
        let model = Arc::new(ScriptedLlmClient::new(vec![calls(&[(
            "x1",
            "exit",
            r#"{"final_result":"ship it"}"#,
        )])]));
        let finisher = ChatModelAgent::builder("finisher")
            .model(model.clone())
            .with_exit_tool()
            .build()
            .unwrap();
        let agent = LoopAgent::new("refine", "", vec![Arc::new(finisher)], 5).unwrap();

        let events = Runner::new(RunnerConfig::new(Arc::new(agent)))
            .query(CancellationToken::new(), "topic")
            .collect_all()
            .await;
        assert_eq!(model.call_count(), 1);
        assert_eq!(model.calls()[0].tool_names, vec![EXIT_TOOL_NAME.to_string()]);
        let last = events.last().unwrap();
        assert_eq!(last.action, Some(AgentAction::Exit));
        assert_eq!(last.message_output().unwrap().content, "ship it");
    }

    #[tokio::test]
    async fn test_transfer_routes_to_specialist() {
        let router = ChatModelAgent::builder("router")
            .instruction("Pick a specialist.")
            .model(Arc::new(ScriptedLlmClient::new(vec![calls(&[(
                "t1",
                "transfer_to_weather",
                "",
            )])])))
            .build()
            .unwrap();
        let weather_model = scripted(&["sunny"]);
        let agent = TransferAgent::new(
            router,
            vec![
                Arc::new(leaf("weather", weather_model.clone())),
                Arc::new(leaf("billing", scripted(&[]))),
            ],
        )
        .unwrap();

        let events = Runner::new(RunnerConfig::new(Arc::new(agent)))
            .query(CancellationToken::new(), "weather in Paris?")
            .collect_all()
            .await;
        assert!(events
            .iter()
            .any(|e| e.action == Some(AgentAction::TransferTo("weather".to_string()))));
        let last = events.last().unwrap();
        assert_eq!(last.agent_name, "weather");
        assert_eq!(last.message_output().unwrap().content, "sunny");
        assert_eq!(weather_model.calls()[0].messages[0].role, Role::User);
    }

    #[tokio::test]
    async fn test_tool_failures_are_fed_back_to_model() {
        let model = Arc::new(ScriptedLlmClient::new(vec![
            calls(&[("c1", "add", "{not json"), ("c2", "boom", "{}")]),
            Message::assistant("recovered"),
        ]));
        let agent = ChatModelAgent::builder("calc")
            .model(model.clone())
            .tool(
                FunctionTool::new("add", "Add", |args: Value| async move {
                    Ok::<_, String>(args.to_string())
                })
                .with_schema(json!({"type": "object", "properties": {"a": {"type": "integer"}}, "required": ["a"]})),
            )
            .tool(FunctionTool::new("boom", "Always fails", |_args: Value| async move {
                Err::<String, _>("disk on fire".to_string())
            }))
            .build()
            .unwrap();

        let events = Runner::new(RunnerConfig::new(Arc::new(agent)))
            .query(CancellationToken::new(), "compute")
            .collect_all()
            .await;
        assert_eq!(events.last().unwrap().message_output().unwrap().content, "recovered");

        let fed_back: Vec<_> = model.calls()[1]
            .messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .map(|m| m.content.clone())
            .collect();
        assert_eq!(fed_back.len(), 2);
        let payload: Value = serde_json::from_str(&fed_back[0]).unwrap();
        assert_eq!(payload["error"], "invalid_arguments");
        assert_eq!(payload["tool"], "add");
        assert!(fed_back[1].contains("disk on fire"));
    }

    #[tokio::test]
    async fn test_unknown_tool_fails_the_run() {
        let agent = leaf(
            "solver",
            Arc::new(ScriptedLlmClient::new(vec![calls(&[("c1", "teleport", "{}")])])),
        );
        let events = Runner::new(RunnerConfig::new(Arc::new(agent)))
            .query(CancellationToken::new(), "go")
            .collect_all()
            .await;
        assert!(matches!(last_error(&events), AgentError::ToolNotFound(name) if name == "teleport"));
        assert_eq!(events.last().unwrap().agent_name, "solver");
        assert_eq!(events.iter().filter(|e| e.is_error()).count(), 1);
    }

    #[tokio::test]
    async fn test_max_iterations_exceeded_through_runner() {
        let looping = calls(&[("c", "noop", "{}")]);
        let agent = ChatModelAgent::builder("stuck")
            .model(Arc::new(ScriptedLlmClient::new(vec![]).with_fallback(looping)))
            .tool(FunctionTool::new("noop", "Does nothing", |_args: Value| async move {
                Ok::<_, String>("ok".to_string())
            }))
            .max_iterations(2)
            .build()
            .unwrap();
        let events = Runner::new(RunnerConfig::new(Arc::new(agent)))
            .query(CancellationToken::new(), "go")
            .collect_all()
            .await;
        assert!(matches!(last_error(&events), AgentError::MaxIterationsExceeded(2)));
    }

    #[tokio::test]
    async fn test_streaming_output_through_runner() {
        let model = ScriptedLlmClient::new(vec![Message::assistant("hello world")]).with_stream_chunks(4);
        let agent = leaf("talker", Arc::new(model));
        let events = Runner::new(RunnerConfig::new(Arc::new(agent)).with_streaming(true))
            .query(CancellationToken::new(), "hi")
            .collect_all()
            .await;
        assert_eq!(events.len(), 1);
        let Some(EventOutput::Stream(mut stream)) = events.into_iter().next().and_then(|e| e.output) else {
            panic!("expected a stream event");
        };
        let mut parts = Vec::new();
        while let Some(chunk) = stream.recv().await {
            parts.push(chunk.unwrap().content);
        }
        assert_eq!(parts, vec!["hell", "o wo", "rld"]);
    }

    #[tokio::test]
    async fn test_cancel_during_tool_call_stops_run() {
        let started = Arc::new(Notify::new());
        let dispatched = Arc::new(AtomicUsize::new(0));
        let tool = {
            let started = started.clone();
            let dispatched = dispatched.clone();
            FunctionTool::new("crawl", "Slow crawl", move |_args: Value| {
                let started = started.clone();
                let dispatched = dispatched.clone();
                async move {
                    dispatched.fetch_add(1, Ordering::SeqCst);
                    started.notify_one();
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok::<_, String>("pages".to_string())
                }
            })
        };
        let model = Arc::new(
            ScriptedLlmClient::new(vec![]).with_fallback(calls(&[("c", "crawl", "{}")])),
        );
        let agent = ChatModelAgent::builder("crawler")
            .model(model.clone())
            .tool(tool)
            .build()
            .unwrap();

        let cancel = CancellationToken::new();
        let iter = Runner::new(RunnerConfig::new(Arc::new(agent))).query(cancel.clone(), "crawl it");
        started.notified().await;
        cancel.cancel();

        let events = tokio::time::timeout(Duration::from_secs(2), iter.collect_all())
            .await
            .expect("cancellation should end the run promptly");
        assert!(last_error(&events).is_cancelled());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(dispatched.load(Ordering::SeqCst), 1);
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn test_dropping_event_iter_cancels_run() {
        let dispatched = Arc::new(AtomicUsize::new(0));
        let counter = dispatched.clone();
        let model = ScriptedLlmClient::new(vec![calls(&[("c", "count", "{}")])])
            .with_delay(Duration::from_millis(150));
        let agent = ChatModelAgent::builder("counter")
            .model(Arc::new(model))
            .tool(FunctionTool::new("count", "Counts", move |_args: Value| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>("1".to_string())
                }
            }))
            .build()
            .unwrap();

        let iter = Runner::new(RunnerConfig::new(Arc::new(agent))).query(CancellationToken::new(), "go");
        drop(iter);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(dispatched.load(Ordering::SeqCst), 0);
    }

    fn refine_loop(model: Arc<ScriptedLlmClient>) -> Arc<dyn Agent> {
        let writer = ChatModelAgent::builder("writer")
            .instruction("Improve: {draft}")
            .model(model)
            .output_key("draft")
            .build()
            .unwrap();
        Arc::new(LoopAgent::new("refine", "", vec![Arc::new(writer)], 5).unwrap())
    }

    #[tokio::test]
    async fn test_loop_resumes_after_completed_iterations() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let first = Arc::new(ScriptedLlmClient::from_results(vec![
            Ok(Message::assistant("v1")),
            Ok(Message::assistant("v2")),
            Err(LlmError::Api("upstream down".to_string())),
        ]));
        let events = Runner::new(RunnerConfig::new(refine_loop(first.clone())).with_checkpoint_store(store.clone()))
            .query_with(CancellationToken::new(), "topic", RunOptions::with_checkpoint_id("essay"))
            .collect_all()
            .await;
        assert!(matches!(last_error(&events), AgentError::Inference(_)));
        assert_eq!(events.last().unwrap().agent_name, "writer");
        assert_eq!(first.call_count(), 3);

        let saved = load(store.as_ref(), "essay").await;
        assert!(!saved.completed);
        assert_eq!(saved.state["draft"], "v2");

        let second = Arc::new(ScriptedLlmClient::new(vec![]).with_fallback(Message::assistant("vN")));
        let events = Runner::new(RunnerConfig::new(refine_loop(second.clone())).with_checkpoint_store(store.clone()))
            .query_with(CancellationToken::new(), "ignored", RunOptions::with_checkpoint_id("essay"))
            .collect_all()
            .await;
        assert!(events.iter().all(|e| !e.is_error()));
        assert_eq!(second.call_count(), 3);

        let resumed = &second.calls()[0];
        assert_eq!(resumed.system_prompt(), Some("Improve: v2"));
        let contents: Vec<_> = resumed
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(contents, vec!["topic", "v1", "v2"]);

        let done = load(store.as_ref(), "essay").await;
        assert!(done.completed);
        assert!(done.cursor.is_empty());
    }

    #[tokio::test]
    async fn test_file_store_resumes_sequence_in_new_runner() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn CheckpointStore> = Arc::new(FileCheckpointStore::new(dir.path()).await.unwrap());

        let build = |a: Arc<ScriptedLlmClient>, b: Arc<ScriptedLlmClient>| -> Arc<dyn Agent> {
            Arc::new(
                SequentialAgent::new("pipeline", "", vec![Arc::new(leaf("a", a)), Arc::new(leaf("b", b))]).unwrap(),
            )
        };

        let events = Runner::new(
            RunnerConfig::new(build(scripted(&["from a"]), scripted(&[]))).with_checkpoint_store(store.clone()),
        )
        .query_with(CancellationToken::new(), "start", RunOptions::with_checkpoint_id("job-1"))
        .collect_all()
        .await;
        assert_eq!(events.last().unwrap().agent_name, "b");

        let a_again = scripted(&[]);
        let b_again = scripted(&["from b"]);
        let events = Runner::new(RunnerConfig::new(build(a_again.clone(), b_again.clone())).with_checkpoint_store(store))
            .query_with(CancellationToken::new(), "start", RunOptions::with_checkpoint_id("job-1"))
            .collect_all()
            .await;
        assert!(events.iter().all(|e| !e.is_error()));
        assert_eq!(a_again.call_count(), 0);
        let seen: Vec<_> = b_again.calls()[0].messages.iter().map(|m| m.content.clone()).collect();
        assert_eq!(seen, vec!["start".to_string(), "from a".to_string()]);
    }

    fn panel(a: Arc<ScriptedLlmClient>, b: Arc<ScriptedLlmClient>, c: Arc<ScriptedLlmClient>) -> Arc<dyn Agent> {
        let a = ChatModelAgent::builder("a").model(a).output_key("verdict").build().unwrap();
        let b = ChatModelAgent::builder("b")
            .model(b)
            .output_key("verdict")
            .tool(FunctionTool::new("noop", "Slow no-op", |_args: Value| async move {
                tokio::time::sleep(Duration::from_millis(150)).await;
                Ok::<_, String>("ok".to_string())
            }))
            .build()
            .unwrap();
        let c = ChatModelAgent::builder("c").model(c).output_key("c_view").build().unwrap();
        let branches: Vec<Arc<dyn Agent>> = vec![Arc::new(a), Arc::new(b), Arc::new(c)];
        Arc::new(ParallelAgent::new("panel", "", branches).unwrap())
    }

    #[tokio::test]
    async fn test_parallel_resume_skips_finished_branches_without_duplicates() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let a = Arc::new(ScriptedLlmClient::new(vec![Message::assistant("a done")]).with_delay(Duration::from_millis(60)));
        let b = Arc::new(
            ScriptedLlmClient::from_results(vec![
                Ok(calls(&[("n1", "noop", "{}")])),
                Err(LlmError::Api("upstream down".to_string())),
            ])
            .with_delay(Duration::from_millis(10)),
        );
        let c = scripted(&["c done"]);

        let events = Runner::new(RunnerConfig::new(panel(a, b.clone(), c)).with_checkpoint_store(store.clone()))
            .query_with(CancellationToken::new(), "start", RunOptions::with_checkpoint_id("panel-1"))
            .collect_all()
            .await;
        assert!(matches!(last_error(&events), AgentError::Inference(_)));
        assert_eq!(events.last().unwrap().agent_name, "b");
        assert_eq!(b.call_count(), 2);

        // a 完成时 b 已有一条工具调用在途；这些消息不应进入检查点
        let saved = load(store.as_ref(), "panel-1").await;
        assert!(!saved.completed);
        assert_eq!(saved.state["verdict"], "a done");
        assert_eq!(saved.state["c_view"], "c done");
        let history: Vec<_> = saved.history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(history, vec!["start", "c done", "a done"]);

        let a_again = scripted(&[]);
        let b_again = scripted(&["b done"]);
        let c_again = scripted(&[]);
        let events = Runner::new(
            RunnerConfig::new(panel(a_again.clone(), b_again.clone(), c_again.clone())).with_checkpoint_store(store.clone()),
        )
        .query_with(CancellationToken::new(), "ignored", RunOptions::with_checkpoint_id("panel-1"))
        .collect_all()
        .await;
        assert!(events.iter().all(|e| !e.is_error()));
        assert_eq!(a_again.call_count(), 0);
        assert_eq!(c_again.call_count(), 0);
        assert_eq!(b_again.call_count(), 1);
        let seen: Vec<_> = b_again.calls()[0].messages.iter().map(|m| m.content.clone()).collect();
        assert_eq!(seen, vec!["start".to_string()]);

        let done = load(store.as_ref(), "panel-1").await;
        assert!(done.completed);
        assert_eq!(done.state["verdict"], "b done");
        assert_eq!(done.state["c_view"], "c done");
        let history: Vec<_> = done.history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(history, vec!["start", "c done", "a done", "b done"]);
    }
}
