//! Streaming event protocol
//!
//! A producer (an agent step or the orchestrator itself) emits at least one
//! `Status`, then zero or more non-empty `Chunk`s, then exactly one terminal
//! `Complete` or `Error`. Events travel over a bounded channel; dropping the
//! [`EventStream`] is how a consumer cancels.

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// One event of a streamed chat response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Work announcement
    Status {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
    },
    /// Text fragment, in concatenation order
    Chunk {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
    },
    /// Successful end of a producer's output
    Complete {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
    },
    /// Failed end of a producer's output
    Error {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
    },
}

impl StreamEvent {
    pub fn status(content: impl Into<String>, agent: Option<&str>) -> Self {
        Self::Status {
            content: content.into(),
            agent: agent.map(str::to_string),
        }
    }

    pub fn chunk(content: impl Into<String>, agent: Option<&str>) -> Self {
        Self::Chunk {
            content: content.into(),
            agent: agent.map(str::to_string),
        }
    }

    pub fn complete(content: impl Into<String>, agent: Option<&str>) -> Self {
        Self::Complete {
            content: content.into(),
            agent: agent.map(str::to_string),
        }
    }

    pub fn error(content: impl Into<String>, agent: Option<&str>) -> Self {
        Self::Error {
            content: content.into(),
            agent: agent.map(str::to_string),
        }
    }

    pub fn content(&self) -> &str {
        match self {
            StreamEvent::Status { content, .. }
            | StreamEvent::Chunk { content, .. }
            | StreamEvent::Complete { content, .. }
            | StreamEvent::Error { content, .. } => content,
        }
    }

    /// Producing agent, `None` for the orchestrator
    pub fn agent(&self) -> Option<&str> {
        match self {
            StreamEvent::Status { agent, .. }
            | StreamEvent::Chunk { agent, .. }
            | StreamEvent::Complete { agent, .. }
            | StreamEvent::Error { agent, .. } => agent.as_deref(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete { .. } | StreamEvent::Error { .. })
    }
}

/// Consumer side of a streamed chat response
pub struct EventStream {
    receiver: mpsc::Receiver<StreamEvent>,
}

impl EventStream {
    /// Create a channel pair for building an event stream
    pub fn channel(buffer: usize) -> (EventSender, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (EventSender { sender: tx }, Self { receiver: rx })
    }

    /// Drain every remaining event
    pub async fn collect(mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.receiver.recv().await {
            events.push(event);
        }
        events
    }

    /// Drain the stream and return the orchestrator's final text, if it completed
    pub async fn final_response(self) -> Option<String> {
        self.collect().await.into_iter().rev().find_map(|event| match event {
            StreamEvent::Complete {
                content,
                agent: None,
            } => Some(content),
            _ => None,
        })
    }
}

impl Stream for EventStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_recv(cx)
    }
}

/// The consumer dropped its [`EventStream`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamClosed;

/// Producer side of a streamed chat response
#[derive(Clone)]
pub struct EventSender {
    sender: mpsc::Sender<StreamEvent>,
}

impl EventSender {
    /// Send an event, failing once the consumer has gone away
    pub async fn send(&self, event: StreamEvent) -> Result<(), StreamClosed> {
        self.sender.send(event).await.map_err(|_| StreamClosed)
    }

    /// Check if the receiver is closed
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
