//! SequentialAgent：按声明顺序依次运行子智能体
//!
//! 每个子智能体的输入 = 组合输入 + 此前所有子智能体的输出；任一失败立即终止。
//! 子智能体返回 Exit 或 BreakLoop 时停止剩余序列，并把动作向上传递。

use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::{run_child, validate_sub_agents, Agent, AgentOutcome, RunContext};
use crate::checkpoint::Position;
use crate::core::{AgentError, SessionState};
use crate::memory::Message;
use crate::react::AgentAction;

pub struct SequentialAgent {
    name: String,
    description: String,
    sub_agents: Vec<Arc<dyn Agent>>,
}

impl SequentialAgent {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        sub_agents: Vec<Arc<dyn Agent>>,
    ) -> Result<Self, AgentError> {
        let name = name.into();
        validate_sub_agents("SequentialAgent", &name, &sub_agents)?;
        Ok(Self {
            name,
            description: description.into(),
            sub_agents,
        })
    }

    pub fn sub_agents(&self) -> &[Arc<dyn Agent>] {
        &self.sub_agents
    }
}

#[async_trait]
impl Agent for SequentialAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn run(
        &self,
        ctx: &RunContext,
        input: Vec<Message>,
        state: &SessionState,
    ) -> Result<AgentOutcome, AgentError> {
        let (start, mut carried) = match ctx.position() {
            Some(Position::Sequential { next_index, carried }) => {
                tracing::info!(agent = %self.name, next_index, "resuming sequence");
                (next_index, carried)
            }
            _ => (0, Vec::new()),
        };

        for (idx, sub) in self.sub_agents.iter().enumerate().skip(start) {
            ctx.check_cancelled()?;
            let sub_input: Vec<Message> = input.iter().chain(carried.iter()).cloned().collect();
            let outcome = run_child(sub.as_ref(), ctx, sub_input, state).await?;
            carried.extend(outcome.output);

            if let Some(action @ (AgentAction::Exit | AgentAction::BreakLoop)) = outcome.action {
                tracing::info!(agent = %self.name, sub_agent = %sub.name(), ?action, "sequence stopped early");
                ctx.clear_position();
                return Ok(AgentOutcome::new(carried).with_action(action));
            }

            ctx.set_position(Position::Sequential {
                next_index: idx + 1,
                carried: carried.clone(),
            });
            ctx.save_checkpoint().await?;
        }

        ctx.clear_position();
        Ok(AgentOutcome::new(carried))
    }
}
