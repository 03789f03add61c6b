//! 运行上下文：一次运行内所有智能体共享的句柄
//!
//! 持有取消令牌、事件通道、任务调度器、恢复游标、运行记录与检查点写入器。
//! 每层组合智能体通过 `enter(name)` 得到子上下文，path 形如 `root/child/grandchild`，用作恢复游标的 key。
//!
//! 叶子智能体的推理消息先写入自己的暂存区，成功结束时才并入运行记录；
//! 这样并行分支保存的检查点不会带上兄弟分支尚未完成的消息，恢复重跑时也不会重复。

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::checkpoint::{CheckpointStore, Position, ResumeCursor, RunCheckpoint, CHECKPOINT_VERSION};
use crate::core::{AgentError, SessionState, TaskScheduler};
use crate::memory::Message;
use crate::react::events::{event_channel, AgentEvent, EventIter, EventSink};

/// 检查点写入目标
#[derive(Clone)]
pub struct Checkpointer {
    pub store: Arc<dyn CheckpointStore>,
    pub id: String,
}

struct RunShared {
    run_id: String,
    root_agent: String,
    cancel: CancellationToken,
    events: EventSink,
    scheduler: Arc<TaskScheduler>,
    streaming: bool,
    input: Vec<Message>,
    state: SessionState,
    cursor: Mutex<ResumeCursor>,
    transcript: Mutex<Vec<Message>>,
    checkpointer: Option<Checkpointer>,
    failed_agent: Mutex<Option<String>>,
    save_lock: tokio::sync::Mutex<()>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// 运行上下文；clone 共享同一次运行
#[derive(Clone)]
pub struct RunContext {
    shared: Arc<RunShared>,
    path: String,
    /// 未提交的消息；None 时直接写入运行记录
    pending: Option<Arc<Mutex<Vec<Message>>>>,
    /// 祖先中的有界 ParallelAgent 已为本分支占用一个 AgentBranch 配额
    branch_permit: bool,
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.shared.run_id)
            .field("path", &self.path)
            .finish()
    }
}

impl RunContext {
    /// 最小上下文：新状态、默认调度器、无检查点（测试与直接调用 Agent::run 时使用）
    pub fn new(cancel: CancellationToken, event_buffer: usize) -> (Self, EventIter) {
        Self::builder(cancel).event_buffer(event_buffer).build()
    }

    pub fn builder(cancel: CancellationToken) -> RunContextBuilder {
        RunContextBuilder::new(cancel)
    }

    /// 进入子智能体
    pub fn enter(&self, name: &str) -> Self {
        let path = if self.path.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.path, name)
        };
        Self {
            shared: Arc::clone(&self.shared),
            path,
            pending: None,
            branch_permit: self.branch_permit,
        }
    }

    /// 标记后代运行在已占用的分支配额之下
    pub(crate) fn with_branch_permit(&self) -> Self {
        Self {
            branch_permit: true,
            ..self.clone()
        }
    }

    pub(crate) fn holds_branch_permit(&self) -> bool {
        self.branch_permit
    }

    /// 开一个消息暂存区；之后 record_message 写入暂存区，直到 commit
    pub(crate) fn buffered(&self) -> Self {
        Self {
            pending: Some(Arc::new(Mutex::new(Vec::new()))),
            ..self.clone()
        }
    }

    /// 暂存的消息并入运行记录；未 commit 的暂存区随上下文丢弃
    pub(crate) fn commit(&self) {
        if let Some(pending) = &self.pending {
            let drained: Vec<Message> = lock(pending).drain(..).collect();
            lock(&self.shared.transcript).extend(drained);
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn run_id(&self) -> &str {
        &self.shared.run_id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.shared.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// 每次状态迁移前检查
    pub fn check_cancelled(&self) -> Result<(), AgentError> {
        if self.is_cancelled() {
            Err(AgentError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.shared.scheduler
    }

    pub fn streaming(&self) -> bool {
        self.shared.streaming
    }

    pub fn state(&self) -> &SessionState {
        &self.shared.state
    }

    /// 投递事件（通道满时等待消费方）
    pub async fn emit(&self, event: AgentEvent) -> Result<(), AgentError> {
        self.shared.events.send(event).await
    }

    pub(crate) async fn emit_terminal(&self, event: AgentEvent) {
        self.shared.events.send_terminal(event).await
    }

    /// 追加到运行记录（有暂存区时先暂存）
    pub fn record_message(&self, msg: Message) {
        match &self.pending {
            Some(pending) => lock(pending).push(msg),
            None => lock(&self.shared.transcript).push(msg),
        }
    }

    pub fn transcript(&self) -> Vec<Message> {
        lock(&self.shared.transcript).clone()
    }

    /// 当前智能体的恢复位置
    pub fn position(&self) -> Option<Position> {
        lock(&self.shared.cursor).get(&self.path).cloned()
    }

    pub fn set_position(&self, pos: Position) {
        lock(&self.shared.cursor).set(self.path.clone(), pos);
    }

    /// 原子地读改写当前位置（并行分支并发更新时使用）
    pub fn update_position<F>(&self, f: F)
    where
        F: FnOnce(Option<Position>) -> Option<Position>,
    {
        let mut cursor = lock(&self.shared.cursor);
        let current = cursor.positions.remove(&self.path);
        if let Some(next) = f(current) {
            cursor.set(self.path.clone(), next);
        }
    }

    /// 组合完成：清除自身及所有后代的位置
    pub fn clear_position(&self) {
        lock(&self.shared.cursor).clear_subtree(&self.path);
    }

    /// 记录最先失败的智能体（错误事件的 agent_name）
    pub(crate) fn mark_failed(&self, agent: &str) {
        let mut slot = lock(&self.shared.failed_agent);
        if slot.is_none() {
            *slot = Some(agent.to_string());
        }
    }

    pub(crate) fn failed_agent(&self) -> Option<String> {
        lock(&self.shared.failed_agent).clone()
    }

    /// 在组合边界保存检查点（未配置存储时为空操作）
    pub async fn save_checkpoint(&self) -> Result<(), AgentError> {
        self.persist(false).await
    }

    pub(crate) async fn persist(&self, completed: bool) -> Result<(), AgentError> {
        let Some(cp) = &self.shared.checkpointer else {
            return Ok(());
        };
        // 串行化保存，保证最后一次写入的是最新快照
        let _guard = self.shared.save_lock.lock().await;
        let snapshot = RunCheckpoint {
            version: CHECKPOINT_VERSION,
            run_id: self.shared.run_id.clone(),
            agent: self.shared.root_agent.clone(),
            input: self.shared.input.clone(),
            history: self.transcript(),
            state: self.shared.state.snapshot(),
            cursor: if completed {
                ResumeCursor::default()
            } else {
                lock(&self.shared.cursor).clone()
            },
            completed,
            saved_at: Utc::now(),
        };
        cp.store.set(&cp.id, snapshot.to_bytes()?).await?;
        tracing::debug!(
            checkpoint_id = %cp.id,
            path = %self.path,
            completed,
            "checkpoint saved"
        );
        Ok(())
    }
}

/// RunContext 构建器（Runner 使用）
pub struct RunContextBuilder {
    cancel: CancellationToken,
    event_buffer: usize,
    streaming: bool,
    scheduler: Arc<TaskScheduler>,
    state: SessionState,
    input: Vec<Message>,
    transcript: Vec<Message>,
    cursor: ResumeCursor,
    checkpointer: Option<Checkpointer>,
    root_agent: String,
    run_id: Option<String>,
}

impl RunContextBuilder {
    fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            event_buffer: 16,
            streaming: false,
            scheduler: Arc::new(TaskScheduler::default()),
            state: SessionState::new(),
            input: Vec::new(),
            transcript: Vec::new(),
            cursor: ResumeCursor::default(),
            checkpointer: None,
            root_agent: String::new(),
            run_id: None,
        }
    }

    pub fn event_buffer(mut self, n: usize) -> Self {
        self.event_buffer = n;
        self
    }

    pub fn streaming(mut self, on: bool) -> Self {
        self.streaming = on;
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<TaskScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn state(mut self, state: SessionState) -> Self {
        self.state = state;
        self
    }

    pub fn input(mut self, input: Vec<Message>) -> Self {
        self.input = input;
        self
    }

    pub fn transcript(mut self, transcript: Vec<Message>) -> Self {
        self.transcript = transcript;
        self
    }

    pub fn cursor(mut self, cursor: ResumeCursor) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn checkpointer(mut self, store: Arc<dyn CheckpointStore>, id: impl Into<String>) -> Self {
        self.checkpointer = Some(Checkpointer { store, id: id.into() });
        self
    }

    pub fn root_agent(mut self, name: impl Into<String>) -> Self {
        self.root_agent = name.into();
        self
    }

    pub fn run_id(mut self, id: impl Into<String>) -> Self {
        self.run_id = Some(id.into());
        self
    }

    /// 运行令牌派生自传入令牌：调用方取消会传导下来，EventIter 关闭只取消本次运行
    pub fn build(self) -> (RunContext, EventIter) {
        let run_cancel = self.cancel.child_token();
        let (events, iter) = event_channel(self.event_buffer, run_cancel.clone());
        (self.attach(events, run_cancel), iter)
    }

    /// 接上已创建的事件通道；run_cancel 必须是创建该通道时使用的令牌
    pub(crate) fn attach(self, events: EventSink, run_cancel: CancellationToken) -> RunContext {
        let shared = RunShared {
            run_id: self
                .run_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            root_agent: self.root_agent,
            cancel: run_cancel,
            events,
            scheduler: self.scheduler,
            streaming: self.streaming,
            input: self.input,
            state: self.state,
            cursor: Mutex::new(self.cursor),
            transcript: Mutex::new(self.transcript),
            checkpointer: self.checkpointer,
            failed_agent: Mutex::new(None),
            save_lock: tokio::sync::Mutex::new(()),
        };
        RunContext {
            shared: Arc::new(shared),
            path: String::new(),
            pending: None,
            branch_permit: false,
        }
    }
}
