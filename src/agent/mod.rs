//! 智能体：统一的 Agent trait 与五种实现
//!
//! - ChatModelAgent：一个推理循环
//! - SequentialAgent / ParallelAgent / LoopAgent：顺序、并行、有界迭代组合
//! - TransferAgent：由模型决定把控制权转交给哪个子智能体

pub mod chat_model;
pub mod context;
pub mod instruction;
pub mod loop_agent;
pub mod parallel;
pub mod sequential;
pub mod transfer;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{AgentError, SessionState};
use crate::memory::Message;
use crate::react::AgentAction;

pub use chat_model::{ChatModelAgent, ChatModelAgentBuilder};
pub use context::{RunContext, RunContextBuilder};
pub use instruction::render_instruction;
pub use loop_agent::LoopAgent;
pub use parallel::ParallelAgent;
pub use sequential::SequentialAgent;
pub use transfer::TransferAgent;

/// 一次调用的结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentOutcome {
    /// 追加到调用方历史的输出消息
    pub output: Vec<Message>,
    pub action: Option<AgentAction>,
}

impl AgentOutcome {
    pub fn new(output: Vec<Message>) -> Self {
        Self { output, action: None }
    }

    pub fn with_action(mut self, action: AgentAction) -> Self {
        self.action = Some(action);
        self
    }

    /// 最后一条输出的文本
    pub fn text(&self) -> Option<&str> {
        self.output.last().map(|m| m.content.as_str())
    }
}

/// 智能体
#[async_trait]
pub trait Agent: Send + Sync {
    /// 在同一组合内唯一
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 运行一次；事件经 ctx 投递，state 为本次运行共享的会话状态
    async fn run(
        &self,
        ctx: &RunContext,
        input: Vec<Message>,
        state: &SessionState,
    ) -> Result<AgentOutcome, AgentError>;
}

/// 在子上下文中运行子智能体；失败时记录最先失败者
pub(crate) async fn run_child(
    child: &dyn Agent,
    ctx: &RunContext,
    input: Vec<Message>,
    state: &SessionState,
) -> Result<AgentOutcome, AgentError> {
    let child_ctx = ctx.enter(child.name());
    let result = child.run(&child_ctx, input, state).await;
    if result.is_err() {
        ctx.mark_failed(child.name());
    }
    result
}

/// 组合构建校验：非空、名称唯一
pub(crate) fn validate_sub_agents(kind: &str, name: &str, sub_agents: &[Arc<dyn Agent>]) -> Result<(), AgentError> {
    if name.trim().is_empty() {
        return Err(AgentError::InvalidConfig(format!("{kind} name must not be empty")));
    }
    if sub_agents.is_empty() {
        return Err(AgentError::InvalidConfig(format!(
            "{kind} '{name}' needs at least one sub-agent"
        )));
    }
    let mut seen = HashSet::new();
    for agent in sub_agents {
        if !seen.insert(agent.name()) {
            return Err(AgentError::InvalidConfig(format!(
                "{kind} '{name}' has duplicate sub-agent name '{}'",
                agent.name()
            )));
        }
    }
    Ok(())
}
