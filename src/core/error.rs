//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：工具级失败回灌给模型（ReportToModel），推理与结构性错误终止运行（Abort）。

use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::llm::LlmError;

/// 编排运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 模型调用失败（重试之后仍失败，或不可重试）
    #[error("Inference failed: {0}")]
    Inference(#[from] LlmError),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// 工具运行但失败；可恢复，正常情况下不会离开 ToolDispatcher
    #[error("Tool '{tool}' failed: {cause}")]
    ToolExecution { tool: String, cause: String },

    #[error("Max iterations exceeded ({0})")]
    MaxIterationsExceeded(usize),

    #[error("Cancelled")]
    Cancelled,

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AgentError::Cancelled)
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 把错误内容作为工具结果交给模型，让模型自行修正
    ReportToModel(String),
    /// 终止当前运行，错误上抛给 Runner
    Abort,
}
