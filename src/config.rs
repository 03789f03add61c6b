//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__RUNNER__ENABLE_STREAMING=true`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::llm::RetryConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub runner: RunnerSection,
    pub agent: AgentSection,
    pub llm: LlmSection,
    pub scheduler: SchedulerSection,
    pub checkpoint: CheckpointConfig,
}

/// [runner] 段：流式输出与事件通道容量
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerSection {
    #[serde(default)]
    pub enable_streaming: bool,
    /// 事件通道容量；消费者跟不上时运行任务在此处等待
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_event_buffer() -> usize {
    16
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            enable_streaming: false,
            event_buffer: default_event_buffer(),
        }
    }
}

/// [agent] 段：ChatModelAgent 的默认上限
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    /// 单次推理循环内模型调用次数上限；未设置表示不限
    pub max_iterations: Option<usize>,
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

fn default_tool_timeout_secs() -> u64 {
    30
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: None,
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

/// [llm] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmSection {
    #[serde(default)]
    pub retry: LlmRetrySection,
}

/// [llm.retry] 段：指数退避
#[derive(Debug, Clone, Deserialize)]
pub struct LlmRetrySection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    8000
}

impl Default for LlmRetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl LlmRetrySection {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// [scheduler] 段：工具并发与并行分支并发
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    #[serde(default = "default_max_concurrent_tools")]
    pub max_concurrent_tools: usize,
    #[serde(default = "default_max_parallel_branches")]
    pub max_parallel_branches: usize,
}

fn default_max_concurrent_tools() -> usize {
    3
}

fn default_max_parallel_branches() -> usize {
    8
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_concurrent_tools: default_max_concurrent_tools(),
            max_parallel_branches: default_max_parallel_branches(),
        }
    }
}

/// 检查点后端
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointBackend {
    #[default]
    Memory,
    File,
    Sqlite,
}

/// [checkpoint] 段：file 后端的 path 为目录，sqlite 后端为数据库文件
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CheckpointConfig {
    #[serde(default)]
    pub backend: CheckpointBackend,
    pub path: Option<PathBuf>,
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
