//! TransferAgent：由模型决定把对话转交给哪个子智能体
//!
//! 协调者是一个 ChatModelAgent，其工具目录额外包含每个子智能体对应的 `transfer_to_<name>` 伪工具。
//! 模型调用伪工具后，协调者的完整历史交给目标子智能体，目标的输出即组合输出。
//! 路由表是封闭的名称 -> 智能体映射，构建时校验名称唯一。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::agent::{run_child, validate_sub_agents, Agent, AgentOutcome, ChatModelAgent, RunContext};
use crate::checkpoint::Position;
use crate::core::{AgentError, SessionState};
use crate::memory::Message;
use crate::react::{AgentAction, AgentEvent};
use crate::tools::Tool;

const TRANSFER_PREFIX: &str = "transfer_to_";

/// 转交伪工具名
pub fn transfer_tool_name(agent: &str) -> String {
    format!("{TRANSFER_PREFIX}{agent}")
}

/// 转交伪工具：执行只返回确认文本，真正的转交由推理循环识别
struct TransferTool {
    name: String,
    target: String,
    description: String,
}

#[async_trait]
impl Tool for TransferTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn execute(&self, _args: Value) -> Result<String, String> {
        Ok(format!("Successfully transferred to agent [{}]", self.target))
    }
}

pub struct TransferAgent {
    coordinator: ChatModelAgent,
    sub_agents: Vec<Arc<dyn Agent>>,
    routes: HashMap<String, Arc<dyn Agent>>,
}

impl TransferAgent {
    pub fn new(coordinator: ChatModelAgent, sub_agents: Vec<Arc<dyn Agent>>) -> Result<Self, AgentError> {
        validate_sub_agents("TransferAgent", coordinator.name(), &sub_agents)?;
        if sub_agents.iter().any(|a| a.name() == coordinator.name()) {
            return Err(AgentError::InvalidConfig(format!(
                "TransferAgent '{}' cannot transfer to itself",
                coordinator.name()
            )));
        }
        let routes = sub_agents
            .iter()
            .map(|a| (a.name().to_string(), Arc::clone(a)))
            .collect();
        Ok(Self {
            coordinator,
            sub_agents,
            routes,
        })
    }

    pub fn sub_agent_names(&self) -> Vec<&str> {
        self.sub_agents.iter().map(|a| a.name()).collect()
    }

    fn transfer_tools(&self) -> (Vec<Arc<dyn Tool>>, HashMap<String, String>) {
        let mut tools: Vec<Arc<dyn Tool>> = Vec::with_capacity(self.sub_agents.len());
        let mut handoffs = HashMap::new();
        for agent in &self.sub_agents {
            let name = transfer_tool_name(agent.name());
            tools.push(Arc::new(TransferTool {
                name: name.clone(),
                target: agent.name().to_string(),
                description: format!(
                    "Transfer the conversation to agent '{}': {}",
                    agent.name(),
                    agent.description()
                ),
            }));
            handoffs.insert(name, agent.name().to_string());
        }
        (tools, handoffs)
    }

    async fn hand_off(
        &self,
        ctx: &RunContext,
        target: &str,
        history: Vec<Message>,
        state: &SessionState,
    ) -> Result<AgentOutcome, AgentError> {
        let agent = self
            .routes
            .get(target)
            .ok_or_else(|| AgentError::UnknownAgent(target.to_string()))?;
        let outcome = run_child(agent.as_ref(), ctx, history, state).await?;
        ctx.clear_position();
        Ok(outcome)
    }
}

#[async_trait]
impl Agent for TransferAgent {
    fn name(&self) -> &str {
        self.coordinator.name()
    }

    fn description(&self) -> &str {
        self.coordinator.description()
    }

    async fn run(
        &self,
        ctx: &RunContext,
        input: Vec<Message>,
        state: &SessionState,
    ) -> Result<AgentOutcome, AgentError> {
        if let Some(Position::Transfer { target, carried }) = ctx.position() {
            tracing::info!(agent = %self.name(), %target, "resuming transfer");
            return self.hand_off(ctx, &target, carried, state).await;
        }

        let (tools, handoffs) = self.transfer_tools();
        let outcome = self
            .coordinator
            .run_loop(ctx, input, state, tools, handoffs)
            .await?;

        let Some(target) = outcome.handoff.clone() else {
            return self.coordinator.finish(ctx, &outcome).await;
        };

        tracing::info!(agent = %self.name(), %target, "transferring");
        ctx.emit(AgentEvent::action(self.name(), AgentAction::TransferTo(target.clone())))
            .await?;
        ctx.set_position(Position::Transfer {
            target: target.clone(),
            carried: outcome.messages.clone(),
        });
        ctx.save_checkpoint().await?;
        self.hand_off(ctx, &target, outcome.messages, state).await
    }
}
