//! 运行快照：检查点中保存的全部内容
//!
//! 快照以 JSON 字节写入 CheckpointStore；版本号不匹配时拒绝恢复。

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::checkpoint::CheckpointError;
use crate::memory::Message;

/// 当前快照格式版本
pub const CHECKPOINT_VERSION: u32 = 1;

/// 某个组合智能体的恢复位置，按智能体路径（"root/child"）索引
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Position {
    /// 下一个要运行的子智能体下标，以及此前子智能体的输出
    Sequential {
        next_index: usize,
        carried: Vec<Message>,
    },
    /// 已完成的轮数、本轮下一个子智能体下标、本轮已累积的输出
    Loop {
        iteration: usize,
        next_index: usize,
        carried: Vec<Message>,
    },
    /// 已完成分支的输出（按分支名）
    Parallel {
        completed: BTreeMap<String, Vec<Message>>,
    },
    /// 已决定转交的目标，以及交给它的完整历史
    Transfer {
        target: String,
        carried: Vec<Message>,
    },
}

/// 恢复游标：智能体路径 -> 位置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumeCursor {
    pub positions: BTreeMap<String, Position>,
}

impl ResumeCursor {
    pub fn get(&self, path: &str) -> Option<&Position> {
        self.positions.get(path)
    }

    pub fn set(&mut self, path: impl Into<String>, pos: Position) {
        self.positions.insert(path.into(), pos);
    }

    /// 移除 path 及其所有后代的位置
    pub fn clear_subtree(&mut self, path: &str) {
        let prefix = format!("{path}/");
        self.positions
            .retain(|k, _| k != path && !k.starts_with(&prefix));
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// 一次运行的检查点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCheckpoint {
    pub version: u32,
    pub run_id: String,
    /// 根智能体名称
    pub agent: String,
    /// 根智能体收到的输入
    pub input: Vec<Message>,
    /// 运行记录：输入与所有 assistant / tool 消息
    pub history: Vec<Message>,
    pub state: HashMap<String, Value>,
    pub cursor: ResumeCursor,
    pub completed: bool,
    pub saved_at: DateTime<Utc>,
}

impl RunCheckpoint {
    pub fn to_bytes(&self) -> Result<Vec<u8>, CheckpointError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CheckpointError> {
        let cp: RunCheckpoint = serde_json::from_slice(bytes)?;
        if cp.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion(cp.version));
        }
        Ok(cp)
    }
}
