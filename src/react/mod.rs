//! 认知层：ReAct 主循环、执行事件、流式消息

pub mod events;
pub mod loop_;
pub mod stream;

pub use events::{event_channel, AgentAction, AgentEvent, EventIter, EventOutput, EventSink};
pub use loop_::{LoopOutcome, ReasoningLoop};
pub use stream::{MessageStream, StreamWriter};
