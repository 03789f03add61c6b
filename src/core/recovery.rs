//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction：工具执行失败回灌为工具消息，其余错误终止运行。

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::ToolExecution { tool, cause } => {
                RecoveryAction::ReportToModel(format!("Error: tool '{tool}' failed: {cause}"))
            }
            _ => RecoveryAction::Abort,
        }
    }
}
