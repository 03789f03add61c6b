//! 执行事件：智能体运行过程中按顺序产出的事件，以及投递/拉取它们的通道两端
//!
//! 事件经有界 mpsc 通道从运行任务流向调用方：通道满时生产方等待（背压），
//! 调用方通过 EventIter 逐个拉取；EventIter 被 drop 或 close 时取消整个运行。

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::memory::Message;
use crate::react::stream::MessageStream;

/// 控制流动作
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "target", rename_all = "snake_case")]
pub enum AgentAction {
    /// 结束整个组合（穿透 Sequential / Loop）
    Exit,
    /// 仅结束最近一层 LoopAgent
    BreakLoop,
    /// 控制权转交给指定名称的智能体
    TransferTo(String),
}

/// 事件携带的输出：完整消息或进行中的流
#[derive(Debug)]
pub enum EventOutput {
    Message(Message),
    Stream(MessageStream),
}

impl EventOutput {
    pub fn as_message(&self) -> Option<&Message> {
        match self {
            EventOutput::Message(m) => Some(m),
            EventOutput::Stream(_) => None,
        }
    }
}

/// 单个执行事件
#[derive(Debug)]
pub struct AgentEvent {
    pub agent_name: String,
    pub output: Option<EventOutput>,
    pub action: Option<AgentAction>,
    pub err: Option<AgentError>,
}

impl AgentEvent {
    pub fn message(agent_name: impl Into<String>, msg: Message) -> Self {
        Self {
            agent_name: agent_name.into(),
            output: Some(EventOutput::Message(msg)),
            action: None,
            err: None,
        }
    }

    pub fn stream(agent_name: impl Into<String>, stream: MessageStream) -> Self {
        Self {
            agent_name: agent_name.into(),
            output: Some(EventOutput::Stream(stream)),
            action: None,
            err: None,
        }
    }

    pub fn action(agent_name: impl Into<String>, action: AgentAction) -> Self {
        Self {
            agent_name: agent_name.into(),
            output: None,
            action: Some(action),
            err: None,
        }
    }

    pub fn error(agent_name: impl Into<String>, err: AgentError) -> Self {
        Self {
            agent_name: agent_name.into(),
            output: None,
            action: None,
            err: Some(err),
        }
    }

    pub fn with_action(mut self, action: AgentAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn is_error(&self) -> bool {
        self.err.is_some()
    }

    /// 完整消息输出（流式事件返回 None）
    pub fn message_output(&self) -> Option<&Message> {
        self.output.as_ref().and_then(EventOutput::as_message)
    }
}

/// 生产端：运行任务内所有智能体共享
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<AgentEvent>,
    cancel: CancellationToken,
}

impl EventSink {
    /// 投递事件；通道满时等待，运行被取消或调用方已离开时返回 Cancelled
    pub async fn send(&self, event: AgentEvent) -> Result<(), AgentError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AgentError::Cancelled),
            r = self.tx.send(event) => r.map_err(|_| {
                self.cancel.cancel();
                AgentError::Cancelled
            }),
        }
    }

    /// 终止事件：取消后仍需送达，只在调用方已离开时丢弃
    pub(crate) async fn send_terminal(&self, event: AgentEvent) {
        let _ = self.tx.send(event).await;
    }
}

/// 消费端：惰性拉取事件，序列在运行结束后关闭
#[derive(Debug)]
pub struct EventIter {
    rx: mpsc::Receiver<AgentEvent>,
    cancel: CancellationToken,
}

/// 创建一对有界事件通道；cancel 为本次运行的令牌
pub fn event_channel(buffer: usize, cancel: CancellationToken) -> (EventSink, EventIter) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (
        EventSink {
            tx,
            cancel: cancel.clone(),
        },
        EventIter { rx, cancel },
    )
}

impl EventIter {
    /// 下一个事件；运行结束后返回 None
    pub async fn next(&mut self) -> Option<AgentEvent> {
        self.rx.recv().await
    }

    /// 提前结束：取消运行并丢弃未读事件
    pub fn close(&mut self) {
        self.cancel.cancel();
        self.rx.close();
    }

    /// 读完剩余事件（测试与演示用）
    pub async fn collect_all(mut self) -> Vec<AgentEvent> {
        let mut out = Vec::new();
        while let Some(ev) = self.next().await {
            out.push(ev);
        }
        out
    }
}

impl Drop for EventIter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Stream for EventIter {
    type Item = AgentEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (sink, mut iter) = event_channel(4, CancellationToken::new());
        sink.send(AgentEvent::message("a", Message::assistant("1"))).await.unwrap();
        sink.send(AgentEvent::action("a", AgentAction::Exit)).await.unwrap();
        drop(sink);
        let first = iter.next().await.unwrap();
        assert_eq!(first.message_output().unwrap().content, "1");
        assert_eq!(iter.next().await.unwrap().action, Some(AgentAction::Exit));
        assert!(iter.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_iter_cancels_run() {
        let cancel = CancellationToken::new();
        let (sink, iter) = event_channel(1, cancel.clone());
        drop(iter);
        assert!(cancel.is_cancelled());
        let err = sink.send(AgentEvent::message("a", Message::assistant("x"))).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_full_channel_yields_to_cancel() {
        let cancel = CancellationToken::new();
        let (sink, _iter) = event_channel(1, cancel.clone());
        sink.send(AgentEvent::message("a", Message::assistant("x"))).await.unwrap();
        let blocked = tokio::spawn({
            let sink = sink.clone();
            async move { sink.send(AgentEvent::message("a", Message::assistant("y"))).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        cancel.cancel();
        assert!(blocked.await.unwrap().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_action_serde_shape() {
        let v = serde_json::to_value(AgentAction::TransferTo("billing".into())).unwrap();
        assert_eq!(v, serde_json::json!({"type": "transfer_to", "target": "billing"}));
    }
}
