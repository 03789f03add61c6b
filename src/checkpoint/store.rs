//! 检查点存储抽象与内存实现
//!
//! 存储只认不透明字节：按调用方给出的 checkpoint id 读写，每次保存覆盖旧值。

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

/// 检查点读写错误
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoint IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unsupported checkpoint version: {0}")]
    UnsupportedVersion(u32),

    #[error("Invalid checkpoint id: {0:?}")]
    InvalidId(String),

    #[error("Checkpoint storage error: {0}")]
    Storage(String),
}

/// 检查点存储
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Vec<u8>>, CheckpointError>;

    async fn set(&self, id: &str, bytes: Vec<u8>) -> Result<(), CheckpointError>;
}

/// 进程内存储（测试与演示用）
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn get(&self, id: &str) -> Result<Option<Vec<u8>>, CheckpointError> {
        Ok(self.entries.read().await.get(id).cloned())
    }

    async fn set(&self, id: &str, bytes: Vec<u8>) -> Result<(), CheckpointError> {
        if id.is_empty() {
            return Err(CheckpointError::InvalidId(id.to_string()));
        }
        self.entries.write().await.insert(id.to_string(), bytes);
        Ok(())
    }
}
