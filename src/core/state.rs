//! 会话状态：一次运行内所有智能体共享的键值黑板
//!
//! 智能体通过 output_key 写入、通过指令模板 {key} 读取，实现组合智能体之间的数据传递。
//! 整张表由一把互斥锁保护，调用方看不到锁；并行分支写同一个 key 时后写者胜出。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

/// 共享会话状态；clone 得到同一份数据的句柄
#[derive(Clone, Debug, Default)]
pub struct SessionState {
    inner: Arc<Mutex<HashMap<String, Value>>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从检查点快照恢复
    pub fn from_snapshot(values: HashMap<String, Value>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(values)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    /// 字符串值直接返回，其它值序列化为 JSON 文本
    pub fn get_text(&self, key: &str) -> Option<String> {
        self.get(key).map(|v| match v {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.lock().insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.lock().remove(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// 当前内容的拷贝（写检查点用）
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.lock().clone()
    }

    /// 用快照整体替换当前内容；已持有的句柄同样可见
    pub fn restore(&self, values: HashMap<String, Value>) {
        *self.lock() = values;
    }
}
