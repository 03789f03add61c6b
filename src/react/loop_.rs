//! ReAct 主循环
//!
//! Thinking（调用模型）-> Acting（按模型给出的顺序逐个分发工具调用）-> Thinking ... 直到：
//! - 模型回复不含工具调用：Done，回复即答案
//! - 调用了 exit 工具：Done，final_result 即答案
//! - 调用了转交伪工具：结束并带上转交目标
//! - 推理失败、结构性分发失败、取消、模型调用次数超过 max_iterations：Failed
//!
//! 每条 assistant 消息与 tool 消息都作为事件投递，并写入运行记录。

use std::collections::HashMap;

use futures_util::StreamExt;
use serde_json::Value;

use crate::agent::RunContext;
use crate::core::AgentError;
use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, Role, ToolCallRequest};
use crate::react::events::AgentEvent;
use crate::react::stream;
use crate::tools::{ExitTool, ToolDescriptor, ToolDispatcher};

/// 循环结束时的结果
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    /// 最终答案；转交时为发起转交的那条 assistant 消息
    pub final_message: Message,
    /// 输入加上本次循环追加的全部消息（不含 system 指令）
    pub messages: Vec<Message>,
    pub exit: bool,
    pub handoff: Option<String>,
}

enum Terminal {
    Exit(String),
    Handoff(String),
}

/// 单个智能体的推理循环
pub struct ReasoningLoop<'a> {
    model: &'a dyn LlmClient,
    dispatcher: &'a ToolDispatcher,
    max_iterations: Option<usize>,
    exit_tool: Option<String>,
    /// 转交伪工具名 -> 目标智能体名
    handoffs: HashMap<String, String>,
}

impl<'a> ReasoningLoop<'a> {
    pub fn new(model: &'a dyn LlmClient, dispatcher: &'a ToolDispatcher) -> Self {
        Self {
            model,
            dispatcher,
            max_iterations: None,
            exit_tool: None,
            handoffs: HashMap::new(),
        }
    }

    /// 模型调用次数上限；None 表示不限
    pub fn with_max_iterations(mut self, max: Option<usize>) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_exit_tool(mut self, name: impl Into<String>) -> Self {
        self.exit_tool = Some(name.into());
        self
    }

    pub fn with_handoffs(mut self, handoffs: HashMap<String, String>) -> Self {
        self.handoffs = handoffs;
        self
    }

    /// 运行到终态；system 为渲染后的指令
    pub async fn run(
        &self,
        ctx: &RunContext,
        agent_name: &str,
        system: Option<Message>,
        input: Vec<Message>,
    ) -> Result<LoopOutcome, AgentError> {
        let descriptors = self.dispatcher.descriptors();
        let has_system = system.is_some();
        let mut history: Vec<Message> = system.into_iter().chain(input).collect();
        let mut model_calls = 0usize;

        loop {
            ctx.check_cancelled()?;
            if let Some(max) = self.max_iterations {
                if model_calls >= max {
                    tracing::warn!(agent = %agent_name, max, "max iterations exceeded");
                    return Err(AgentError::MaxIterationsExceeded(max));
                }
            }
            model_calls += 1;
            tracing::debug!(agent = %agent_name, step = model_calls, "thinking");

            let response = self.think(ctx, agent_name, &history, &descriptors).await?;
            history.push(response.clone());

            if !response.has_tool_calls() {
                tracing::debug!(agent = %agent_name, steps = model_calls, "done");
                return Ok(LoopOutcome {
                    final_message: response,
                    messages: strip_system(history, has_system),
                    exit: false,
                    handoff: None,
                });
            }

            tracing::debug!(agent = %agent_name, calls = response.tool_calls.len(), "acting");
            let mut terminal = None;
            for call in &response.tool_calls {
                ctx.check_cancelled()?;
                let dispatched = self
                    .dispatcher
                    .dispatch(call, ctx.cancel_token(), ctx.scheduler())
                    .await?;
                if terminal.is_none() {
                    terminal = self.terminal_for(call, dispatched.arguments.as_ref());
                }
                let tool_msg = dispatched.message;
                ctx.record_message(tool_msg.clone());
                ctx.emit(AgentEvent::message(agent_name, tool_msg.clone())).await?;
                history.push(tool_msg);
            }

            // 同一批次内的调用全部分发完，再处理第一个终止信号，保证每个调用都有对应的 tool 消息
            match terminal {
                Some(Terminal::Exit(answer)) => {
                    tracing::debug!(agent = %agent_name, "exit tool called");
                    return Ok(LoopOutcome {
                        final_message: Message::assistant(answer),
                        messages: strip_system(history, has_system),
                        exit: true,
                        handoff: None,
                    });
                }
                Some(Terminal::Handoff(target)) => {
                    tracing::debug!(agent = %agent_name, %target, "handoff requested");
                    return Ok(LoopOutcome {
                        final_message: response,
                        messages: strip_system(history, has_system),
                        exit: false,
                        handoff: Some(target),
                    });
                }
                None => {}
            }
        }
    }

    /// 只有通过 schema 校验的调用才可能终止循环；校验失败时模型收到错误载荷并重试
    fn terminal_for(&self, call: &ToolCallRequest, validated: Option<&Value>) -> Option<Terminal> {
        let args = validated?;
        if let Some(target) = self.handoffs.get(&call.name) {
            return Some(Terminal::Handoff(target.clone()));
        }
        if self.exit_tool.as_deref() == Some(call.name.as_str()) {
            return Some(Terminal::Exit(ExitTool::final_result(args)));
        }
        None
    }

    /// 一次模型调用；流式模式下先投递 MessageStream 事件，再边转发分片边拼接
    async fn think(
        &self,
        ctx: &RunContext,
        agent_name: &str,
        history: &[Message],
        descriptors: &[ToolDescriptor],
    ) -> Result<Message, AgentError> {
        let cancel = ctx.cancel_token();

        if !ctx.streaming() {
            let msg = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                r = self.model.complete(history, descriptors) => r?,
            };
            ctx.record_message(msg.clone());
            ctx.emit(AgentEvent::message(agent_name, msg.clone())).await?;
            return Ok(msg);
        }

        let mut chunks = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            r = self.model.complete_stream(history, descriptors) => r?,
        };
        let (writer, reader) = stream::channel();
        ctx.emit(AgentEvent::stream(agent_name, reader)).await?;

        let mut parts = Vec::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                n = chunks.next() => Some(n),
            };
            let Some(next) = next else {
                writer.fail("cancelled");
                return Err(AgentError::Cancelled);
            };
            match next {
                Some(Ok(chunk)) => {
                    writer.send(chunk.clone());
                    parts.push(chunk);
                }
                Some(Err(e)) => {
                    writer.fail(e.to_string());
                    return Err(e.into());
                }
                None => break,
            }
        }
        drop(writer);

        let mut msg = Message::concat_chunks(parts)
            .map_err(LlmError::MalformedResponse)?
            .unwrap_or_else(|| Message::assistant(""));
        msg.role = Role::Assistant;
        ctx.record_message(msg.clone());
        Ok(msg)
    }
}

fn strip_system(mut history: Vec<Message>, has_system: bool) -> Vec<Message> {
    if has_system && !history.is_empty() {
        history.remove(0);
    }
    history
}
