//! 内置 exit 工具：模型调用它即结束推理循环，参数 final_result 作为最终答案

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::Tool;

pub const EXIT_TOOL_NAME: &str = "exit";

/// exit 工具
#[derive(Debug, Default, Clone, Copy)]
pub struct ExitTool;

impl ExitTool {
    /// 从参数中取最终答案；缺省时为空串
    pub fn final_result(args: &Value) -> String {
        match args.get("final_result") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }
}

#[async_trait]
impl Tool for ExitTool {
    fn name(&self) -> &str {
        EXIT_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Call this when the task is complete. Args: {\"final_result\": \"the final answer\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "final_result": {"type": "string", "description": "Final answer returned to the caller"}
            },
            "required": ["final_result"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        Ok(Self::final_result(&args))
    }
}
