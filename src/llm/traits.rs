//! LLM 客户端抽象
//!
//! 推理本身由外部提供：实现 LlmClient 即可接入。complete 为非流式，complete_stream 返回消息分片流。
//! 失败统一为 LlmError，并区分超时 / 鉴权 / 限流 / 服务不可用 / 响应格式错误，供重试与恢复决策使用。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{stream, Stream};
use thiserror::Error;

use crate::memory::Message;
use crate::tools::ToolDescriptor;

/// 流式分片：每个 Item 是一条部分 assistant 消息
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Message, LlmError>> + Send>>;

/// 模型调用错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("LLM request timed out")]
    Timeout,

    #[error("LLM authentication failed: {0}")]
    Auth(String),

    #[error("LLM rate limited (retry after {retry_after_ms} ms)")]
    RateLimited { retry_after_ms: u64 },

    #[error("LLM service unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed LLM response: {0}")]
    MalformedResponse(String),

    #[error("LLM API error: {0}")]
    Api(String),
}

impl LlmError {
    /// 超时、限流、服务暂不可用可重试；鉴权与格式错误重试无意义
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Timeout | LlmError::RateLimited { .. } | LlmError::Unavailable(_)
        )
    }
}

/// LLM 客户端 trait：非流式完成与流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成；tools 为空表示不提供工具目录
    async fn complete(&self, messages: &[Message], tools: &[ToolDescriptor]) -> Result<Message, LlmError>;

    /// 流式完成，默认退化为一次 complete 的单分片流
    async fn complete_stream(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<ChunkStream, LlmError> {
        let msg = self.complete(messages, tools).await?;
        Ok(Box::pin(stream::iter(vec![Ok(msg)])))
    }
}
