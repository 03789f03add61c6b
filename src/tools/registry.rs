//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），由 ToolRegistry 按名注册与查找，
//! ToolDispatcher 在调用时校验参数、加超时并把失败回灌给模型。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称，在同一目录内唯一
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认为无参数的 object
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具；Err 中的文本会作为失败原因回灌给模型
    async fn execute(&self, args: Value) -> Result<String, String>;
}

/// 发给模型的工具目录条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDescriptor {
    pub fn of(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameters: tool.parameters_schema(),
        }
    }
}

/// 工具注册表：按名称存储 Arc<dyn Tool>；BTreeMap 保证目录顺序稳定
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同名工具后注册者覆盖
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "tool re-registered, previous definition replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 工具目录，每次推理调用都会随历史一起发给模型
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|t| ToolDescriptor::of(t.as_ref())).collect()
    }

    /// 合并另一个注册表（TransferAgent 追加 transfer_to_* 伪工具时使用）
    pub fn extended(&self, extra: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        let mut merged = self.clone();
        for tool in extra {
            merged.register_arc(tool);
        }
        merged
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tool_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    #[async_trait]
    impl Tool for Upper {
        fn name(&self) -> &str {
            "upper"
        }
        fn description(&self) -> &str {
            "Uppercase text"
        }
        async fn execute(&self, args: Value) -> Result<String, String> {
            Ok(args["text"].as_str().unwrap_or_default().to_uppercase())
        }
    }

    #[test]
    fn test_descriptors_carry_schema() {
        let mut reg = ToolRegistry::new();
        reg.register(Upper);
        let d = reg.descriptors();
        assert_eq!(d.len(), 1);
        assert_eq!(d[0].name, "upper");
        assert_eq!(d[0].parameters["type"], "object");
    }

    #[tokio::test]
    async fn test_get_and_execute() {
        let mut reg = ToolRegistry::new();
        reg.register(Upper);
        let tool = reg.get("upper").unwrap();
        let out = tool.execute(serde_json::json!({"text": "hi"})).await.unwrap();
        assert_eq!(out, "HI");
        assert!(reg.get("missing").is_none());
    }

    #[test]
    fn test_extended_keeps_original() {
        let reg = ToolRegistry::new();
        let ext = reg.extended([Arc::new(Upper) as Arc<dyn Tool>]);
        assert!(reg.is_empty());
        assert!(ext.contains("upper"));
    }
}
