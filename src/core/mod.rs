//! 核心编排层：错误与恢复、会话状态、任务调度、Runner、优雅关闭

pub mod error;
pub mod recovery;
pub mod runner;
pub mod shutdown;
pub mod state;
pub mod task_scheduler;

pub use error::{AgentError, RecoveryAction};
pub use recovery::RecoveryEngine;
pub use runner::{RunOptions, Runner, RunnerConfig};
pub use shutdown::{ShutdownReason, ShutdownSignal};
pub use state::SessionState;
pub use task_scheduler::{TaskKind, TaskScheduler};
