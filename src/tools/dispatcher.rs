//! 工具分发器
//!
//! 把模型发出的一次 ToolCallRequest 解析到已注册工具并执行，始终产出恰好一条 tool 消息：
//! - 工具不存在：ToolNotFound，结构性错误，直接上抛
//! - 参数不是合法 JSON 或不符合 schema：返回结构化错误载荷，让模型重试
//! - 工具失败或超时：ToolExecution 经 RecoveryEngine 转为错误文本的 tool 消息
//! - 取消：Cancelled
//!
//! 每次调用输出一条结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::core::task_scheduler::{TaskKind, TaskScheduler};
use crate::core::{AgentError, RecoveryAction, RecoveryEngine};
use crate::memory::{Message, ToolCallRequest};
use crate::tools::schema::validate_arguments;
use crate::tools::{Tool, ToolDescriptor, ToolRegistry};

/// 默认单次工具调用超时
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;

/// 一次分发的结果
#[derive(Debug, Clone)]
pub struct Dispatched {
    /// 回给模型的 tool 消息
    pub message: Message,
    /// 通过解析与 schema 校验的参数；参数无效时为 None
    pub arguments: Option<Value>,
}

/// 工具分发器：持有工具目录与单次调用超时
#[derive(Debug, Clone)]
pub struct ToolDispatcher {
    registry: ToolRegistry,
    timeout: Duration,
    recovery: RecoveryEngine,
}

impl ToolDispatcher {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs.max(1)),
            recovery: RecoveryEngine::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.registry.descriptors()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 执行一次工具调用，返回带 tool_call_id 的 tool 消息，以及通过校验的参数
    pub async fn dispatch(
        &self,
        call: &ToolCallRequest,
        cancel: &CancellationToken,
        scheduler: &TaskScheduler,
    ) -> Result<Dispatched, AgentError> {
        let tool = self
            .registry
            .get(&call.name)
            .ok_or_else(|| AgentError::ToolNotFound(call.name.clone()))?;

        let args = match parse_arguments(&call.arguments) {
            Ok(v) => v,
            Err(detail) => return Ok(self.invalid_arguments(call, detail)),
        };
        if let Err(detail) = validate_arguments(&tool.parameters_schema(), &args) {
            return Ok(self.invalid_arguments(call, detail));
        }
        let message = self.execute(call, tool.as_ref(), args.clone(), cancel, scheduler).await?;
        Ok(Dispatched {
            message,
            arguments: Some(args),
        })
    }

    async fn execute(
        &self,
        call: &ToolCallRequest,
        tool: &dyn Tool,
        args: Value,
        cancel: &CancellationToken,
        scheduler: &TaskScheduler,
    ) -> Result<Message, AgentError> {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            p = scheduler.acquire(TaskKind::ToolExecution) => p?,
        };

        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                audit(&call.name, false, "cancelled", start, &args_preview);
                return Err(AgentError::Cancelled);
            }
            r = timeout(self.timeout, tool.execute(args)) => r,
        };

        let outcome = match &result {
            Ok(Ok(_)) => "ok",
            Ok(Err(_)) => "error",
            Err(_) => "timeout",
        };
        audit(&call.name, outcome == "ok", outcome, start, &args_preview);

        let failure = match result {
            Ok(Ok(content)) => return Ok(Message::tool(content, call.id.clone())),
            Ok(Err(cause)) => AgentError::ToolExecution {
                tool: call.name.clone(),
                cause,
            },
            Err(_) => AgentError::ToolExecution {
                tool: call.name.clone(),
                cause: format!("timed out after {}ms", self.timeout.as_millis()),
            },
        };
        match self.recovery.handle(&failure) {
            RecoveryAction::ReportToModel(text) => {
                tracing::warn!(tool = %call.name, error = %failure, "tool failed, reporting to model");
                Ok(Message::tool(text, call.id.clone()))
            }
            RecoveryAction::Abort => Err(failure),
        }
    }

    fn invalid_arguments(&self, call: &ToolCallRequest, detail: String) -> Dispatched {
        tracing::warn!(tool = %call.name, %detail, "invalid tool arguments");
        let payload = serde_json::json!({
            "error": "invalid_arguments",
            "tool": call.name,
            "detail": detail,
        });
        Dispatched {
            message: Message::tool(payload.to_string(), call.id.clone()),
            arguments: None,
        }
    }
}

/// 空参数按 `{}` 处理（无参工具常见）
fn parse_arguments(raw: &str) -> Result<Value, String> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(raw).map_err(|e| format!("arguments are not valid JSON: {e}"))
}

fn audit(tool: &str, ok: bool, outcome: &str, start: Instant, args_preview: &str) {
    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": tool,
        "ok": ok,
        "outcome": outcome,
        "duration_ms": start.elapsed().as_millis() as u64,
        "args_preview": args_preview,
    });
    tracing::info!(audit = %audit.to_string(), "tool");
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Role;
    use crate::tools::FunctionTool;
    use serde_json::json;

    fn dispatcher() -> ToolDispatcher {
        let mut reg = ToolRegistry::new();
        reg.register(
            FunctionTool::new("add", "Add two integers", |args: Value| async move {
                let a = args["a"].as_i64().ok_or("a missing")?;
                let b = args["b"].as_i64().ok_or("b missing")?;
                Ok::<_, String>((a + b).to_string())
            })
            .with_schema(json!({
                "type": "object",
                "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}},
                "required": ["a", "b"]
            })),
        );
        reg.register(FunctionTool::new("boom", "Always fails", |_args: Value| async move {
            Err::<String, _>("disk on fire".to_string())
        }));
        reg.register(FunctionTool::new("slow", "Sleeps", |_args: Value| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, String>("late".to_string())
        }));
        ToolDispatcher::new(reg, 30)
    }

    fn call(name: &str, args: &str) -> ToolCallRequest {
        ToolCallRequest::new("call_1", name, args)
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let d = dispatcher();
        let msg = d
            .dispatch(&call("add", r#"{"a":2,"b":3}"#), &CancellationToken::new(), &TaskScheduler::default())
            .await
            .unwrap();
        assert_eq!(msg.arguments, Some(json!({"a": 2, "b": 3})));
        let msg = msg.message;
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.content, "5");
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
    }

    #[tokio::test]
    async fn test_unknown_tool_propagates() {
        let d = dispatcher();
        let err = d
            .dispatch(&call("nope", "{}"), &CancellationToken::new(), &TaskScheduler::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolNotFound(n) if n == "nope"));
    }

    #[tokio::test]
    async fn test_malformed_json_becomes_payload() {
        let d = dispatcher();
        let msg = d
            .dispatch(&call("add", "{a:"), &CancellationToken::new(), &TaskScheduler::default())
            .await
            .unwrap();
        assert!(msg.arguments.is_none());
        let msg = msg.message;
        let payload: Value = serde_json::from_str(&msg.content).unwrap();
        assert_eq!(payload["error"], "invalid_arguments");
        assert_eq!(payload["tool"], "add");
    }

    #[tokio::test]
    async fn test_schema_violation_becomes_payload() {
        let d = dispatcher();
        let msg = d
            .dispatch(&call("add", r#"{"a":"two","b":3}"#), &CancellationToken::new(), &TaskScheduler::default())
            .await
            .unwrap();
        assert!(msg.arguments.is_none());
        let payload: Value = serde_json::from_str(&msg.message.content).unwrap();
        assert_eq!(payload["error"], "invalid_arguments");
        assert!(payload["detail"].as_str().unwrap().contains("integer"));
    }

    #[tokio::test]
    async fn test_tool_error_reported_to_model() {
        let d = dispatcher();
        let msg = d
            .dispatch(&call("boom", "{}"), &CancellationToken::new(), &TaskScheduler::default())
            .await
            .unwrap()
            .message;
        assert!(msg.content.contains("boom"));
        assert!(msg.content.contains("disk on fire"));
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
    }

    #[tokio::test]
    async fn test_timeout_reported_to_model() {
        let d = dispatcher().with_timeout(Duration::from_millis(20));
        let msg = d
            .dispatch(&call("slow", ""), &CancellationToken::new(), &TaskScheduler::default())
            .await
            .unwrap()
            .message;
        assert!(msg.content.contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancel_in_flight() {
        let d = dispatcher();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let err = d
            .dispatch(&call("slow", "{}"), &cancel, &TaskScheduler::default())
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
