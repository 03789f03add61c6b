//! 文件检查点存储：每个 id 一个 JSON 文件，先写临时文件再 rename，保证读到的总是完整快照

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::checkpoint::{CheckpointError, CheckpointStore};

/// 目录存储
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// 目录不存在时创建
    pub async fn new(dir: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, CheckpointError> {
        Ok(self.dir.join(format!("{}.json", sanitize_id(id)?)))
    }
}

/// 只允许字母数字与 `-_.`，且不能是 `.` / `..`
fn sanitize_id(id: &str) -> Result<&str, CheckpointError> {
    let valid = !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(id)
    } else {
        Err(CheckpointError::InvalidId(id.to_string()))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn get(&self, id: &str) -> Result<Option<Vec<u8>>, CheckpointError> {
        let path = self.path_for(id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, id: &str, bytes: Vec<u8>) -> Result<(), CheckpointError> {
        let path = self.path_for(id)?;
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", sanitize_id(id)?, uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        tracing::debug!(checkpoint_id = %id, path = %path.display(), bytes = bytes.len(), "checkpoint written");
        Ok(())
    }
}
