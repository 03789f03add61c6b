//! 流式消息：单消费者、只进不退的分片流
//!
//! 写端（StreamWriter）由推理循环持有，发送不阻塞；读端（MessageStream）随 AgentEvent 交给调用方。
//! 读端可以提前 close()，此后写端的发送被静默丢弃，推理循环照常拼接完整消息。

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;

use crate::memory::Message;

type Chunk = Result<Message, String>;

/// 创建一对写端/读端
pub fn channel() -> (StreamWriter, MessageStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (StreamWriter { tx }, MessageStream { rx, closed: false })
}

/// 写端
#[derive(Debug)]
pub struct StreamWriter {
    tx: mpsc::UnboundedSender<Chunk>,
}

impl StreamWriter {
    /// 读端已关闭时返回 false
    pub fn send(&self, chunk: Message) -> bool {
        self.tx.send(Ok(chunk)).is_ok()
    }

    /// 以错误结束流
    pub fn fail(self, err: impl Into<String>) {
        let _ = self.tx.send(Err(err.into()));
    }
}

/// 读端：一条 assistant 消息的分片序列
#[derive(Debug)]
pub struct MessageStream {
    rx: mpsc::UnboundedReceiver<Chunk>,
    closed: bool,
}

impl MessageStream {
    /// 下一个分片；写端结束后返回 None
    pub async fn recv(&mut self) -> Option<Result<Message, String>> {
        if self.closed {
            return None;
        }
        self.rx.recv().await
    }

    /// 放弃剩余分片
    pub fn close(&mut self) {
        self.closed = true;
        self.rx.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// 读完全部分片并拼接
    pub async fn concat(mut self) -> Result<Option<Message>, String> {
        let mut chunks = Vec::new();
        while let Some(chunk) = self.recv().await {
            chunks.push(chunk?);
        }
        Message::concat_chunks(chunks)
    }
}

impl Stream for MessageStream {
    type Item = Result<Message, String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.closed {
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}
