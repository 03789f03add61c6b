//! Mock LLM 客户端（用于测试与演示，无需 API）
//!
//! - MockLlmClient：回显最后一条 User 消息，便于本地跑通编排流程
//! - ScriptedLlmClient：按脚本依次返回预设响应，并记录每次调用收到的历史与工具目录

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;

use super::{ChunkStream, LlmClient, LlmError};
use crate::memory::{Message, Role};
use crate::tools::ToolDescriptor;

/// Mock 客户端：回显用户最后一条消息，并带上 system 指令的首行
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message], _tools: &[ToolDescriptor]) -> Result<Message, LlmError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        let instruction = messages
            .iter()
            .find(|m| m.role == Role::System)
            .and_then(|m| m.content.lines().next())
            .unwrap_or("");
        Ok(Message::assistant(format!(
            "Echo from Mock [{}]: {}",
            instruction, last_user
        )))
    }
}

/// 一次调用的记录：发给模型的历史与工具名
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    pub tool_names: Vec<String>,
}

impl RecordedCall {
    /// 本次调用的 system 指令（渲染后）
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }
}

/// 脚本化客户端：依次弹出预设响应；脚本耗尽后返回 fallback（若未设置则报错）
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<Message, LlmError>>>,
    fallback: Option<Message>,
    calls: Mutex<Vec<RecordedCall>>,
    delay: Option<Duration>,
    stream_chunk_chars: Option<usize>,
}

impl ScriptedLlmClient {
    pub fn new(responses: Vec<Message>) -> Self {
        Self {
            script: Mutex::new(responses.into_iter().map(Ok).collect()),
            ..Self::default()
        }
    }

    /// 脚本中可混入错误
    pub fn from_results(responses: Vec<Result<Message, LlmError>>) -> Self {
        Self {
            script: Mutex::new(responses.into_iter().collect()),
            ..Self::default()
        }
    }

    /// 脚本耗尽后重复返回的响应
    pub fn with_fallback(mut self, msg: Message) -> Self {
        self.fallback = Some(msg);
        self
    }

    /// 每次调用前的模拟延迟
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 流式调用时按字符数切分 content
    pub fn with_stream_chunks(mut self, chars: usize) -> Self {
        self.stream_chunk_chars = Some(chars.max(1));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn next_response(&self) -> Result<Message, LlmError> {
        let popped = self.script.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        match popped {
            Some(r) => r,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| LlmError::Api("script exhausted".to_string())),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message], tools: &[ToolDescriptor]) -> Result<Message, LlmError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedCall {
                messages: messages.to_vec(),
                tool_names: tools.iter().map(|t| t.name.clone()).collect(),
            });
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        self.next_response()
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<ChunkStream, LlmError> {
        let msg = self.complete(messages, tools).await?;
        let Some(size) = self.stream_chunk_chars else {
            return Ok(Box::pin(stream::iter(vec![Ok(msg)])));
        };
        let chars: Vec<char> = msg.content.chars().collect();
        let mut chunks: Vec<Result<Message, LlmError>> = chars
            .chunks(size)
            .map(|c| Ok(Message::assistant(c.iter().collect::<String>())))
            .collect();
        if msg.has_tool_calls() {
            chunks.push(Ok(Message::assistant_with_tools("", msg.tool_calls)));
        }
        Ok(Box::pin(stream::iter(chunks)))
    }
}
