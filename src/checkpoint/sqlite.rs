//! SQLite 检查点存储（sqlx，异步）
//!
//! 需要启用 `async-sqlite` feature。一张表，id 为主键，保存时 INSERT OR REPLACE。

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::checkpoint::{CheckpointError, CheckpointStore};

impl From<sqlx::Error> for CheckpointError {
    fn from(e: sqlx::Error) -> Self {
        CheckpointError::Storage(e.to_string())
    }
}

/// SQLite 存储
#[derive(Debug, Clone)]
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    /// 打开（必要时创建）数据库文件
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, CheckpointError> {
        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    async fn init_tables(&self) -> Result<(), CheckpointError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                id TEXT PRIMARY KEY,
                data BLOB NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn get(&self, id: &str) -> Result<Option<Vec<u8>>, CheckpointError> {
        let row = sqlx::query("SELECT data FROM checkpoints WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<Vec<u8>, _>("data")))
    }

    async fn set(&self, id: &str, bytes: Vec<u8>) -> Result<(), CheckpointError> {
        if id.is_empty() {
            return Err(CheckpointError::InvalidId(id.to_string()));
        }
        sqlx::query("INSERT OR REPLACE INTO checkpoints (id, data, updated_at) VALUES (?, ?, ?)")
            .bind(id)
            .bind(bytes)
            .bind(chrono::Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
