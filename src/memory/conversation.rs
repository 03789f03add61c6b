//! 对话消息：角色、内容、工具调用请求
//!
//! 一次运行的历史是只追加的 Message 序列；Message 构造后不再修改，可序列化以写入检查点。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// 模型发出的工具调用请求；arguments 为原始 JSON 文本
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// 仅 assistant 消息可能携带，顺序即模型给出的顺序
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// role = tool 时指回对应的 ToolCallRequest.id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// 带工具调用的 assistant 消息
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    /// 工具结果消息，tool_call_id 必须与请求一致
    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::plain(Role::Tool, content)
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// 合并流式分片：content 依次拼接；工具调用按 id 合并参数片段，id 为空的片段续写到上一个调用
    ///
    /// 还没有任何调用时就出现 id 为空的片段，视为响应格式错误。
    pub fn concat_chunks<I>(chunks: I) -> Result<Option<Message>, String>
    where
        I: IntoIterator<Item = Message>,
    {
        let mut merged: Option<Message> = None;
        for chunk in chunks {
            let acc = merged.get_or_insert_with(|| Self::plain(chunk.role, ""));
            acc.content.push_str(&chunk.content);
            if acc.tool_call_id.is_none() {
                acc.tool_call_id = chunk.tool_call_id;
            }
            for call in chunk.tool_calls {
                let existing = if call.id.is_empty() {
                    let prev = acc.tool_calls.last_mut();
                    if prev.is_none() {
                        return Err("tool call fragment without id before any tool call".to_string());
                    }
                    prev
                } else {
                    acc.tool_calls.iter_mut().find(|c| c.id == call.id)
                };
                match existing {
                    Some(prev) => {
                        if prev.name.is_empty() {
                            prev.name = call.name;
                        }
                        prev.arguments.push_str(&call.arguments);
                    }
                    None => acc.tool_calls.push(call),
                }
            }
        }
        Ok(merged)
    }
}
