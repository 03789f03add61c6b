//! 带退避重试的 LLM 客户端包装
//!
//! 对可重试错误（超时 / 限流 / 服务不可用）按指数退避重试；限流时优先使用服务端给出的 retry_after。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{ChunkStream, LlmClient, LlmError};
use crate::memory::Message;
use crate::tools::ToolDescriptor;

/// 重试配置
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 首次调用之外的最大重试次数
    pub max_retries: u32,
    /// 第 n 次重试前等待 base_delay * 2^n
    pub base_delay: Duration,
    /// 单次等待上限
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryConfig {
    /// 第 attempt 次失败后的等待时长
    pub fn backoff(&self, attempt: u32, err: &LlmError) -> Duration {
        if let LlmError::RateLimited { retry_after_ms } = err {
            if *retry_after_ms > 0 {
                return Duration::from_millis(*retry_after_ms).min(self.max_delay);
            }
        }
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// 包装任意 LlmClient，在可重试错误上自动退避重试
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    config: RetryConfig,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T, LlmError>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: std::future::Future<Output = Result<T, LlmError>> + Send,
        T: Send,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let wait = self.config.backoff(attempt, &e);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        wait_ms = wait.as_millis() as u64,
                        "LLM call failed ({}), retrying",
                        e
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(&self, messages: &[Message], tools: &[ToolDescriptor]) -> Result<Message, LlmError> {
        self.with_retry(|| self.inner.complete(messages, tools)).await
    }

    /// 只重试建流阶段；流开始后的错误交给调用方
    async fn complete_stream(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<ChunkStream, LlmError> {
        self.with_retry(|| self.inner.complete_stream(messages, tools)).await
    }
}
