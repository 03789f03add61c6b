//! 消息层：对话消息与工具调用请求（运行历史的基本单元）

pub mod conversation;

pub use conversation::{Message, Role, ToolCallRequest};
