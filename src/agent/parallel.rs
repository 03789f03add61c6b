//! ParallelAgent：在同一输入、同一会话状态上并发运行全部子智能体
//!
//! 所有分支完成才算完成；任一分支失败时其余分支被丢弃（取消）。事件在分支之间交错，但每个分支内部有序。
//! 多个分支写同一个 output_key 时后写者胜出。输出按声明顺序拼接各分支输出。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::try_join_all;

use crate::agent::{run_child, validate_sub_agents, Agent, AgentOutcome, RunContext};
use crate::checkpoint::Position;
use crate::core::{AgentError, SessionState, TaskKind};
use crate::memory::Message;
use crate::react::AgentAction;

pub struct ParallelAgent {
    name: String,
    description: String,
    sub_agents: Vec<Arc<dyn Agent>>,
    bounded: bool,
}

impl ParallelAgent {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        sub_agents: Vec<Arc<dyn Agent>>,
    ) -> Result<Self, AgentError> {
        let name = name.into();
        validate_sub_agents("ParallelAgent", &name, &sub_agents)?;
        Ok(Self {
            name,
            description: description.into(),
            sub_agents,
            bounded: false,
        })
    }

    /// 受 TaskScheduler 的 max_parallel_branches 限制
    ///
    /// 只有最外层的有界 ParallelAgent 为每个分支占用配额；嵌套在其分支内的有界 ParallelAgent 沿用祖先的配额，不再申请。
    pub fn bounded(mut self) -> Self {
        self.bounded = true;
        self
    }

    async fn run_branch(
        &self,
        sub: &Arc<dyn Agent>,
        ctx: &RunContext,
        input: Vec<Message>,
        state: &SessionState,
    ) -> Result<AgentOutcome, AgentError> {
        let (_permit, branch_ctx) = if self.bounded && !ctx.holds_branch_permit() {
            let permit = tokio::select! {
                biased;
                _ = ctx.cancel_token().cancelled() => return Err(AgentError::Cancelled),
                p = ctx.scheduler().acquire(TaskKind::AgentBranch) => p?,
            };
            (Some(permit), ctx.with_branch_permit())
        } else {
            (None, ctx.clone())
        };

        let outcome = run_child(sub.as_ref(), &branch_ctx, input, state).await?;
        let branch = sub.name().to_string();
        let output = outcome.output.clone();
        ctx.update_position(move |pos| {
            let mut completed = match pos {
                Some(Position::Parallel { completed }) => completed,
                _ => BTreeMap::new(),
            };
            completed.insert(branch, output);
            Some(Position::Parallel { completed })
        });
        ctx.save_checkpoint().await?;
        Ok(outcome)
    }
}

#[async_trait]
impl Agent for ParallelAgent {
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
        let done = match ctx.position() {
            Some(Position::Parallel { completed }) => {
                tracing::info!(agent = %self.name, completed = completed.len(), "resuming parallel branches");
                completed
            }
            _ => BTreeMap::new(),
        };

        let branches = self.sub_agents.iter().map(|sub| {
            let previous = done.get(sub.name()).cloned();
            let input = input.clone();
            async move {
                match previous {
                    Some(output) => Ok(AgentOutcome::new(output)),
                    None => self.run_branch(sub, ctx, input, state).await,
                }
            }
        });
        let outcomes = try_join_all(branches).await?;

        // Exit 优先于 BreakLoop；转交已在分支内部消化
        let action = outcomes
            .iter()
            .filter_map(|o| o.action.clone())
            .min_by_key(|a| match a {
                AgentAction::Exit => 0,
                AgentAction::BreakLoop => 1,
                AgentAction::TransferTo(_) => 2,
            })
            .filter(|a| !matches!(a, AgentAction::TransferTo(_)));
        let output: Vec<Message> = outcomes.into_iter().flat_map(|o| o.output).collect();

        ctx.clear_position();
        Ok(AgentOutcome { output, action })
    }
}
