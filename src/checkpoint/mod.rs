//! 检查点：运行快照格式与存储后端（内存 / 文件 / SQLite）

pub mod file;
pub mod snapshot;
#[cfg(feature = "async-sqlite")]
pub mod sqlite;
pub mod store;

use std::path::PathBuf;
use std::sync::Arc;

pub use file::FileCheckpointStore;
pub use snapshot::{Position, ResumeCursor, RunCheckpoint, CHECKPOINT_VERSION};
#[cfg(feature = "async-sqlite")]
pub use sqlite::SqliteCheckpointStore;
pub use store::{CheckpointError, CheckpointStore, InMemoryCheckpointStore};

use crate::config::{CheckpointBackend, CheckpointConfig};

/// 按配置创建存储后端
pub async fn store_from_config(cfg: &CheckpointConfig) -> Result<Arc<dyn CheckpointStore>, CheckpointError> {
    match cfg.backend {
        CheckpointBackend::Memory => Ok(Arc::new(InMemoryCheckpointStore::new())),
        CheckpointBackend::File => {
            let dir = cfg.path.clone().unwrap_or_else(|| PathBuf::from("checkpoints"));
            Ok(Arc::new(FileCheckpointStore::new(dir).await?))
        }
        #[cfg(feature = "async-sqlite")]
        CheckpointBackend::Sqlite => {
            let path = cfg.path.clone().unwrap_or_else(|| PathBuf::from("checkpoints.db"));
            Ok(Arc::new(SqliteCheckpointStore::new(path).await?))
        }
        #[cfg(not(feature = "async-sqlite"))]
        CheckpointBackend::Sqlite => Err(CheckpointError::Storage(
            "sqlite backend requires the `async-sqlite` feature".to_string(),
        )),
    }
}
