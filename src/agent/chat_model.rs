//! ChatModelAgent：包装一个推理循环的叶子智能体
//!
//! 每次调用：从会话状态渲染指令 -> 运行 ReasoningLoop -> 若设置了 output_key，把最终答案写回状态。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::agent::instruction::placeholders;
use crate::agent::{render_instruction, Agent, AgentOutcome, RunContext};
use crate::core::{AgentError, SessionState};
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::react::{AgentAction, AgentEvent, LoopOutcome, ReasoningLoop};
use crate::tools::{ExitTool, Tool, ToolDispatcher, ToolRegistry, DEFAULT_TOOL_TIMEOUT_SECS, EXIT_TOOL_NAME};

/// 模型驱动的智能体
pub struct ChatModelAgent {
    name: String,
    description: String,
    instruction: String,
    model: Arc<dyn LlmClient>,
    dispatcher: ToolDispatcher,
    max_iterations: Option<usize>,
    output_key: Option<String>,
    exit_tool: bool,
}

impl std::fmt::Debug for ChatModelAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatModelAgent")
            .field("name", &self.name)
            .field("tools", self.dispatcher.registry())
            .field("max_iterations", &self.max_iterations)
            .field("output_key", &self.output_key)
            .finish()
    }
}

impl ChatModelAgent {
    pub fn builder(name: impl Into<String>) -> ChatModelAgentBuilder {
        ChatModelAgentBuilder::new(name)
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    pub fn output_key(&self) -> Option<&str> {
        self.output_key.as_deref()
    }

    /// 运行推理循环；extra_tools / handoffs 由 TransferAgent 注入转交伪工具
    pub(crate) async fn run_loop(
        &self,
        ctx: &RunContext,
        input: Vec<Message>,
        state: &SessionState,
        extra_tools: Vec<Arc<dyn Tool>>,
        handoffs: HashMap<String, String>,
    ) -> Result<LoopOutcome, AgentError> {
        let rendered = render_instruction(&self.instruction, state);
        let system = (!rendered.trim().is_empty()).then(|| Message::system(rendered));

        let extended;
        let dispatcher = if extra_tools.is_empty() {
            &self.dispatcher
        } else {
            extended = ToolDispatcher::new(self.dispatcher.registry().extended(extra_tools), 1)
                .with_timeout(self.dispatcher.timeout());
            &extended
        };

        let mut looper = ReasoningLoop::new(self.model.as_ref(), dispatcher)
            .with_max_iterations(self.max_iterations)
            .with_handoffs(handoffs);
        if self.exit_tool {
            looper = looper.with_exit_tool(EXIT_TOOL_NAME);
        }

        let missing: Vec<String> = placeholders(&self.instruction)
            .into_iter()
            .filter(|key| !state.contains(key))
            .collect();
        if !missing.is_empty() {
            tracing::debug!(agent = %self.name, ?missing, "instruction placeholders not in state, left verbatim");
        }

        tracing::info!(agent = %self.name, path = %ctx.path(), "agent started");
        let scoped = ctx.buffered();
        let outcome = looper.run(&scoped, &self.name, system, input).await?;
        scoped.commit();

        if outcome.handoff.is_none() {
            if let Some(key) = &self.output_key {
                state.set(key.clone(), outcome.final_message.content.clone());
            }
        }
        tracing::info!(
            agent = %self.name,
            exit = outcome.exit,
            handoff = ?outcome.handoff,
            "agent finished"
        );
        Ok(outcome)
    }

    /// 循环正常结束后的输出与事件
    pub(crate) async fn finish(&self, ctx: &RunContext, outcome: &LoopOutcome) -> Result<AgentOutcome, AgentError> {
        let final_message = outcome.final_message.clone();
        if outcome.exit {
            // exit 工具给出的答案不是模型消息，单独投递一次并带上 Exit 动作
            ctx.record_message(final_message.clone());
            ctx.emit(AgentEvent::message(&self.name, final_message.clone()).with_action(AgentAction::Exit))
                .await?;
            return Ok(AgentOutcome::new(vec![final_message]).with_action(AgentAction::Exit));
        }
        Ok(AgentOutcome::new(vec![final_message]))
    }
}

#[async_trait]
impl Agent for ChatModelAgent {
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
        let outcome = self
            .run_loop(ctx, input, state, Vec::new(), HashMap::new())
            .await?;
        self.finish(ctx, &outcome).await
    }
}

/// ChatModelAgent 构建器
pub struct ChatModelAgentBuilder {
    name: String,
    description: String,
    instruction: String,
    model: Option<Arc<dyn LlmClient>>,
    tools: ToolRegistry,
    tool_timeout: Duration,
    max_iterations: Option<usize>,
    output_key: Option<String>,
    exit_tool: bool,
}

impl ChatModelAgentBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            instruction: String::new(),
            model: None,
            tools: ToolRegistry::new(),
            tool_timeout: Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS),
            max_iterations: None,
            output_key: None,
            exit_tool: false,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// 指令模板，可含 `{key}` 占位符
    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    pub fn model(mut self, model: Arc<dyn LlmClient>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.register(tool);
        self
    }

    pub fn tool_arc(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.register_arc(tool);
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = Some(max);
        self
    }

    /// 最终答案写入会话状态的 key
    pub fn output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    /// 注册内置 exit 工具
    pub fn with_exit_tool(mut self) -> Self {
        self.exit_tool = true;
        self
    }

    pub fn build(self) -> Result<ChatModelAgent, AgentError> {
        if self.name.trim().is_empty() {
            return Err(AgentError::InvalidConfig("agent name must not be empty".to_string()));
        }
        let model = self
            .model
            .ok_or_else(|| AgentError::InvalidConfig(format!("agent '{}' has no model", self.name)))?;
        if self.max_iterations == Some(0) {
            return Err(AgentError::InvalidConfig(format!(
                "agent '{}': max_iterations must be > 0",
                self.name
            )));
        }
        let mut tools = self.tools;
        if self.exit_tool {
            tools.register(ExitTool);
        }
        Ok(ChatModelAgent {
            name: self.name,
            description: self.description,
            instruction: self.instruction,
            model,
            dispatcher: ToolDispatcher::new(tools, DEFAULT_TOOL_TIMEOUT_SECS).with_timeout(self.tool_timeout),
            max_iterations: self.max_iterations,
            output_key: self.output_key,
            exit_tool: self.exit_tool,
        })
    }
}
