//! 指令模板渲染：把 `{key}` 占位符替换为会话状态中的值
//!
//! 字符串原样插入，其它 JSON 值序列化后插入；状态中不存在的 key 保持 `{key}` 原样。

use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::core::SessionState;

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();

fn placeholder_re() -> &'static Regex {
    PLACEHOLDER_RE.get_or_init(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern"))
}

/// 渲染指令；每次智能体调用渲染一次
pub fn render_instruction(template: &str, state: &SessionState) -> String {
    placeholder_re()
        .replace_all(template, |caps: &Captures| {
            let key = &caps[1];
            state.get_text(key).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// 模板中引用的 key（按出现顺序，去重）
pub fn placeholders(template: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for caps in placeholder_re().captures_iter(template) {
        let key = caps[1].to_string();
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}
