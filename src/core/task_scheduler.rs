//! 任务调度：工具执行池与并行分支池
//!
//! 一次运行内所有分支共享同一个调度器：工具执行与并行子智能体分别使用 Semaphore 限制并发。

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::core::AgentError;

/// 任务类型
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TaskKind {
    /// 工具调用，受 max_concurrent_tools 限制
    ToolExecution,
    /// ParallelAgent 的一个分支，受 max_parallel_branches 限制
    AgentBranch,
}

/// 任务调度器
#[derive(Debug)]
pub struct TaskScheduler {
    tool_semaphore: Arc<Semaphore>,
    branch_semaphore: Arc<Semaphore>,
}

impl TaskScheduler {
    pub fn new(max_concurrent_tools: usize, max_parallel_branches: usize) -> Self {
        Self {
            tool_semaphore: Arc::new(Semaphore::new(max_concurrent_tools.max(1))),
            branch_semaphore: Arc::new(Semaphore::new(max_parallel_branches.max(1))),
        }
    }

    /// 获取许可；信号量只在调度器销毁时关闭，此时视为内部错误
    pub async fn acquire(&self, kind: TaskKind) -> Result<OwnedSemaphorePermit, AgentError> {
        let sem = match kind {
            TaskKind::ToolExecution => &self.tool_semaphore,
            TaskKind::AgentBranch => &self.branch_semaphore,
        };
        sem.clone()
            .acquire_owned()
            .await
            .map_err(|_| AgentError::Internal(format!("{kind:?} semaphore closed")))
    }

    pub fn available(&self, kind: TaskKind) -> usize {
        match kind {
            TaskKind::ToolExecution => self.tool_semaphore.available_permits(),
            TaskKind::AgentBranch => self.branch_semaphore.available_permits(),
        }
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(3, 8)
    }
}
