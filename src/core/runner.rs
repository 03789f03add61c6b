//! Runner：顶层驱动
//!
//! 在 tokio 任务上运行根智能体，事件写入有界通道，调用方通过 EventIter 惰性拉取。
//! 带 checkpoint id 时：
//! - 快照未完成：恢复状态、运行记录与游标，从上次的组合边界继续（新输入被忽略）
//! - 快照已完成：以恢复的状态开始新一轮，之前的运行记录拼在新输入之前
//!
//! 运行成功后写入 completed = true 的最终检查点；失败后不再写入，保留最后一个完好的边界。
//! 失败时事件流以恰好一个错误事件结束。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::agent::{Agent, RunContext};
use crate::checkpoint::{CheckpointStore, ResumeCursor, RunCheckpoint};
use crate::config::AppConfig;
use crate::core::{AgentError, SessionState, TaskScheduler};
use crate::memory::Message;
use crate::react::events::{event_channel, AgentEvent, EventIter, EventSink};

/// Runner 配置
#[derive(Clone)]
pub struct RunnerConfig {
    pub agent: Arc<dyn Agent>,
    pub enable_streaming: bool,
    pub checkpoint_store: Option<Arc<dyn CheckpointStore>>,
    pub scheduler: Arc<TaskScheduler>,
    pub event_buffer: usize,
}

impl RunnerConfig {
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        Self {
            agent,
            enable_streaming: false,
            checkpoint_store: None,
            scheduler: Arc::new(TaskScheduler::default()),
            event_buffer: 16,
        }
    }

    /// 从 [runner] / [scheduler] 配置段构建；检查点存储需另行设置
    pub fn from_app_config(agent: Arc<dyn Agent>, cfg: &AppConfig) -> Self {
        Self {
            agent,
            enable_streaming: cfg.runner.enable_streaming,
            checkpoint_store: None,
            scheduler: Arc::new(TaskScheduler::new(
                cfg.scheduler.max_concurrent_tools,
                cfg.scheduler.max_parallel_branches,
            )),
            event_buffer: cfg.runner.event_buffer,
        }
    }

    pub fn with_streaming(mut self, on: bool) -> Self {
        self.enable_streaming = on;
        self
    }

    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint_store = Some(store);
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<TaskScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_event_buffer(mut self, n: usize) -> Self {
        self.event_buffer = n;
        self
    }
}

/// 单次运行选项
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub checkpoint_id: Option<String>,
}

impl RunOptions {
    pub fn with_checkpoint_id(id: impl Into<String>) -> Self {
        Self {
            checkpoint_id: Some(id.into()),
        }
    }
}

/// 运行前准备好的起点
struct Prepared {
    input: Vec<Message>,
    state: SessionState,
    transcript: Vec<Message>,
    cursor: ResumeCursor,
    run_id: Option<String>,
    resumed: bool,
}

impl Prepared {
    fn fresh(messages: Vec<Message>) -> Self {
        Self {
            transcript: messages.clone(),
            input: messages,
            state: SessionState::new(),
            cursor: ResumeCursor::default(),
            run_id: None,
            resumed: false,
        }
    }
}

/// 顶层驱动
#[derive(Clone)]
pub struct Runner {
    config: RunnerConfig,
}

impl Runner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn agent(&self) -> &Arc<dyn Agent> {
        &self.config.agent
    }

    /// 把文本包装成一条 user 消息后运行
    pub fn query(&self, cancel: CancellationToken, text: impl Into<String>) -> EventIter {
        self.run(cancel, vec![Message::user(text)], RunOptions::default())
    }

    pub fn query_with(&self, cancel: CancellationToken, text: impl Into<String>, options: RunOptions) -> EventIter {
        self.run(cancel, vec![Message::user(text)], options)
    }

    /// 启动（或恢复）一次运行，立即返回事件迭代器
    pub fn run(&self, cancel: CancellationToken, messages: Vec<Message>, options: RunOptions) -> EventIter {
        let run_cancel = cancel.child_token();
        let (sink, iter) = event_channel(self.config.event_buffer, run_cancel.clone());
        let config = self.config.clone();
        tokio::spawn(drive(config, run_cancel, sink, messages, options));
        iter
    }
}

async fn drive(
    config: RunnerConfig,
    run_cancel: CancellationToken,
    sink: EventSink,
    messages: Vec<Message>,
    options: RunOptions,
) {
    let agent = Arc::clone(&config.agent);
    let root = agent.name().to_string();

    let store = match (&options.checkpoint_id, &config.checkpoint_store) {
        (Some(id), Some(store)) => Some((Arc::clone(store), id.clone())),
        (Some(id), None) => {
            tracing::warn!(checkpoint_id = %id, "checkpoint id given but no store configured, running without checkpoints");
            None
        }
        _ => None,
    };

    let prepared = match &store {
        Some((store, id)) => match prepare(store.as_ref(), id, &root, messages).await {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(agent = %root, error = %e, "failed to load checkpoint");
                sink.send_terminal(AgentEvent::error(root, e)).await;
                return;
            }
        },
        None => Prepared::fresh(messages),
    };

    let mut builder = RunContext::builder(run_cancel.clone())
        .streaming(config.enable_streaming)
        .scheduler(Arc::clone(&config.scheduler))
        .state(prepared.state)
        .input(prepared.input.clone())
        .transcript(prepared.transcript)
        .cursor(prepared.cursor)
        .root_agent(root.clone());
    if let Some(run_id) = prepared.run_id {
        builder = builder.run_id(run_id);
    }
    if let Some((store, id)) = store {
        builder = builder.checkpointer(store, id);
    }
    let ctx = builder.attach(sink, run_cancel);

    tracing::info!(
        run_id = %ctx.run_id(),
        agent = %root,
        resumed = prepared.resumed,
        streaming = config.enable_streaming,
        "run started"
    );

    let root_ctx = ctx.enter(&root);
    let result = agent.run(&root_ctx, prepared.input, ctx.state()).await;
    let result = match result {
        Ok(outcome) => ctx.persist(true).await.map(|_| outcome),
        Err(e) => Err(e),
    };

    match result {
        Ok(outcome) => {
            tracing::info!(
                run_id = %ctx.run_id(),
                agent = %root,
                outputs = outcome.output.len(),
                "run finished"
            );
        }
        Err(e) => {
            let who = ctx.failed_agent().unwrap_or_else(|| root.clone());
            if e.is_cancelled() {
                tracing::info!(run_id = %ctx.run_id(), agent = %who, "run cancelled");
            } else {
                tracing::warn!(run_id = %ctx.run_id(), agent = %who, error = %e, "run failed");
            }
            ctx.emit_terminal(AgentEvent::error(who, e)).await;
        }
    }
}

/// 读取检查点并决定：恢复 / 续聊 / 全新运行
async fn prepare(
    store: &dyn CheckpointStore,
    id: &str,
    root: &str,
    messages: Vec<Message>,
) -> Result<Prepared, AgentError> {
    let Some(bytes) = store.get(id).await? else {
        return Ok(Prepared::fresh(messages));
    };
    let cp = RunCheckpoint::from_bytes(&bytes)?;
    if cp.agent != root {
        return Err(AgentError::InvalidConfig(format!(
            "checkpoint '{id}' belongs to agent '{}', not '{root}'",
            cp.agent
        )));
    }

    if !cp.completed {
        if !messages.is_empty() {
            tracing::warn!(checkpoint_id = %id, ignored = messages.len(), "resuming unfinished run, new input ignored");
        }
        tracing::info!(checkpoint_id = %id, saved_at = %cp.saved_at, "resuming from checkpoint");
        return Ok(Prepared {
            input: cp.input,
            state: SessionState::from_snapshot(cp.state),
            transcript: cp.history,
            cursor: cp.cursor,
            run_id: Some(cp.run_id),
            resumed: true,
        });
    }

    tracing::info!(checkpoint_id = %id, prior = cp.history.len(), "continuing completed conversation");
    let mut input = cp.history;
    input.extend(messages);
    Ok(Prepared {
        transcript: input.clone(),
        input,
        state: SessionState::from_snapshot(cp.state),
        cursor: ResumeCursor::default(),
        run_id: None,
        resumed: false,
    })
}
