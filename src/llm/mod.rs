//! LLM 层：客户端抽象、退避重试包装、Mock 实现（推理后端由使用方提供）

pub mod mock;
pub mod retry;
pub mod traits;

pub use mock::{MockLlmClient, RecordedCall, ScriptedLlmClient};
pub use retry::{RetryConfig, RetryingLlmClient};
pub use traits::{ChunkStream, LlmClient, LlmError};
