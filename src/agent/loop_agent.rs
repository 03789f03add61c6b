//! LoopAgent：有界迭代精炼
//!
//! 反复按顺序运行子智能体列表，最多 max_iterations 轮，没有自动收敛判断。提前结束条件：
//! - 子智能体返回 Exit（继续向上传递）或 BreakLoop（在此消化）
//! - 设置了 exit_key 且某个子智能体运行后该 key 出现在会话状态中
//!
//! 输出跨轮累积，每个子智能体都能看到此前所有轮次的输出。每个子智能体之后、每轮结束时各保存一次检查点。

use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::{run_child, validate_sub_agents, Agent, AgentOutcome, RunContext};
use crate::checkpoint::Position;
use crate::core::{AgentError, SessionState};
use crate::memory::Message;
use crate::react::AgentAction;

pub struct LoopAgent {
    name: String,
    description: String,
    sub_agents: Vec<Arc<dyn Agent>>,
    max_iterations: usize,
    exit_key: Option<String>,
}

impl LoopAgent {
    /// max_iterations 必须大于 0
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        sub_agents: Vec<Arc<dyn Agent>>,
        max_iterations: usize,
    ) -> Result<Self, AgentError> {
        let name = name.into();
        validate_sub_agents("LoopAgent", &name, &sub_agents)?;
        if max_iterations == 0 {
            return Err(AgentError::InvalidConfig(format!(
                "LoopAgent '{name}': max_iterations must be > 0"
            )));
        }
        Ok(Self {
            name,
            description: description.into(),
            sub_agents,
            max_iterations,
            exit_key: None,
        })
    }

    /// 会话状态中出现该 key 即停止
    pub fn with_exit_key(mut self, key: impl Into<String>) -> Self {
        self.exit_key = Some(key.into());
        self
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    fn sentinel_set(&self, state: &SessionState) -> bool {
        self.exit_key.as_deref().is_some_and(|k| state.contains(k))
    }
}

#[async_trait]
impl Agent for LoopAgent {
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
        let (mut iteration, mut start, mut carried) = match ctx.position() {
            Some(Position::Loop {
                iteration,
                next_index,
                carried,
            }) => {
                tracing::info!(agent = %self.name, iteration, next_index, "resuming loop");
                (iteration, next_index, carried)
            }
            _ => (0, 0, Vec::new()),
        };

        while iteration < self.max_iterations {
            tracing::debug!(agent = %self.name, iteration = iteration + 1, max = self.max_iterations, "loop iteration");
            for idx in start..self.sub_agents.len() {
                ctx.check_cancelled()?;
                let sub = &self.sub_agents[idx];
                let sub_input: Vec<Message> = input.iter().chain(carried.iter()).cloned().collect();
                let outcome = run_child(sub.as_ref(), ctx, sub_input, state).await?;
                carried.extend(outcome.output);

                match outcome.action {
                    Some(AgentAction::Exit) => {
                        tracing::info!(agent = %self.name, sub_agent = %sub.name(), "loop exited");
                        ctx.clear_position();
                        return Ok(AgentOutcome::new(carried).with_action(AgentAction::Exit));
                    }
                    Some(AgentAction::BreakLoop) => {
                        tracing::info!(agent = %self.name, sub_agent = %sub.name(), "loop break");
                        ctx.clear_position();
                        return Ok(AgentOutcome::new(carried));
                    }
                    _ => {}
                }
                if self.sentinel_set(state) {
                    tracing::info!(agent = %self.name, key = ?self.exit_key, "exit key set, loop stopped");
                    ctx.clear_position();
                    return Ok(AgentOutcome::new(carried));
                }

                ctx.set_position(Position::Loop {
                    iteration,
                    next_index: idx + 1,
                    carried: carried.clone(),
                });
                ctx.save_checkpoint().await?;
            }

            iteration += 1;
            start = 0;
            ctx.set_position(Position::Loop {
                iteration,
                next_index: 0,
                carried: carried.clone(),
            });
            ctx.save_checkpoint().await?;
        }

        tracing::info!(agent = %self.name, iterations = iteration, "loop finished");
        ctx.clear_position();
        Ok(AgentOutcome::new(carried))
    }
}
