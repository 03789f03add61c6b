//! 闭包工具：把一个 async 闭包包装成 Tool
//!
//! `FunctionTool::typed` 从参数结构体推导 schema，并在执行前把 JSON 反序列化为该结构体。

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::tools::schema::parameters_schema_for;
use crate::tools::Tool;

type Handler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<String, String>> + Send + Sync>;

/// 闭包工具
#[derive(Clone)]
pub struct FunctionTool {
    name: String,
    description: String,
    schema: Value,
    handler: Handler,
}

impl FunctionTool {
    /// 参数为原始 JSON；schema 默认为任意 object，可用 with_schema 覆盖
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, String>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema: serde_json::json!({"type": "object", "properties": {}}),
            handler: Arc::new(move |args| f(args).boxed()),
        }
    }

    /// 参数为强类型结构体，schema 由 schemars 生成
    pub fn typed<T, F, Fut>(name: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        T: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, String>> + Send + 'static,
    {
        let f = Arc::new(f);
        let handler: Handler = Arc::new(move |args: Value| {
            let f = Arc::clone(&f);
            async move {
                let typed: T = serde_json::from_value(args).map_err(|e| format!("invalid arguments: {e}"))?;
                f(typed).await
            }
            .boxed()
        });
        Self {
            name: name.into(),
            description: description.into(),
            schema: parameters_schema_for::<T>(),
            handler,
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }
}

impl std::fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTool").field("name", &self.name).finish()
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        (self.handler)(args).await
    }
}
