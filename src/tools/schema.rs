//! 工具参数 JSON Schema：schemars 生成，jsonschema 校验

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// 由参数结构体推导 JSON Schema（FunctionTool::typed 使用）
pub fn parameters_schema_for<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| serde_json::json!({"type": "object"}));
    // 模型端只需要 properties / required，去掉 $schema 与 title 噪声
    if let Value::Object(map) = &mut value {
        map.remove("$schema");
        map.remove("title");
    }
    value
}

/// 按 schema 校验参数；不符合时返回全部违例，以 `; ` 连接
pub fn validate_arguments(schema: &Value, args: &Value) -> Result<(), String> {
    let validator = jsonschema::Validator::new(schema).map_err(|e| format!("invalid tool schema: {e}"))?;
    if validator.is_valid(args) {
        return Ok(());
    }
    let errors: Vec<String> = validator.iter_errors(args).map(|e| e.to_string()).collect();
    Err(errors.join("; "))
}
