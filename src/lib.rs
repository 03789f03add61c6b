//! Hive - Rust 多智能体编排引擎
//!
//! 模块划分：
//! - **agent**: Agent trait 与五种实现（ChatModel / Sequential / Parallel / Loop / Transfer）、运行上下文
//! - **checkpoint**: 运行快照与存储后端（内存 / 文件 / SQLite）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、会话状态、任务调度、Runner、优雅关闭
//! - **llm**: LLM 客户端抽象、退避重试、Mock
//! - **memory**: 对话消息类型
//! - **observability**: tracing 初始化
//! - **react**: ReAct 推理循环、执行事件、流式消息
//! - **tools**: 工具注册表、分发器、闭包工具、exit 工具

pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

pub use agent::{
    Agent, AgentOutcome, ChatModelAgent, LoopAgent, ParallelAgent, RunContext, SequentialAgent,
    TransferAgent,
};
pub use checkpoint::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
pub use core::{AgentError, RunOptions, Runner, RunnerConfig, SessionState};
pub use memory::{Message, Role, ToolCallRequest};
pub use react::{AgentAction, AgentEvent, EventIter, EventOutput, MessageStream};
pub use tools::{FunctionTool, Tool, ToolDescriptor, ToolRegistry};
