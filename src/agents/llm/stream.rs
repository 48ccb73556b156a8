//! Provider-side token streams
//!
//! Providers push [`StreamChunk`]s into an [`LlmStreamSender`] from a spawned
//! task; agents read the [`LlmStream`] end, usually through
//! [`LlmStream::text_deltas`]. A transport failure is delivered in-band as an
//! `Err` item, after which the provider stops sending.

use futures::stream::{BoxStream, StreamExt};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use super::{CompletionResponse, FinishReason, TokenUsage};
use crate::agents::domain::Message;
use crate::agents::error::{LlmError, LlmResult};

type ChunkResult = LlmResult<StreamChunk>;

/// The receiving [`LlmStream`] was dropped
pub type SendResult = Result<(), mpsc::error::SendError<ChunkResult>>;

/// One increment of a streamed completion
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub content: String,
    /// Set on the last chunk only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl StreamChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn finish(reason: FinishReason, usage: Option<TokenUsage>) -> Self {
        Self {
            finish_reason: Some(reason),
            usage,
            ..Default::default()
        }
    }

    pub fn has_content(&self) -> bool {
        !self.content.is_empty()
    }

    pub fn is_final(&self) -> bool {
        self.finish_reason.is_some()
    }
}

/// Receiving end of a streamed completion
pub struct LlmStream {
    receiver: mpsc::Receiver<ChunkResult>,
}

impl LlmStream {
    pub fn channel(buffer: usize) -> (LlmStreamSender, Self) {
        let (sender, receiver) = mpsc::channel(buffer);
        (LlmStreamSender { sender }, Self { receiver })
    }

    /// Only the non-empty text fragments, in order
    ///
    /// Finish and usage chunks are dropped; errors pass through.
    pub fn text_deltas(self) -> BoxStream<'static, LlmResult<String>> {
        self.filter_map(|item| async move {
            match item {
                Ok(chunk) if chunk.has_content() => Some(Ok(chunk.content)),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            }
        })
        .boxed()
    }

    /// Drain into one response; the first error aborts
    pub async fn collect(mut self) -> LlmResult<CompletionResponse> {
        let mut content = String::new();
        let mut finish_reason = FinishReason::Stop;
        let mut usage = None;

        while let Some(item) = self.receiver.recv().await {
            let chunk = item?;
            content.push_str(&chunk.content);
            if let Some(reason) = chunk.finish_reason {
                finish_reason = reason;
            }
            usage = chunk.usage.or(usage);
        }

        Ok(CompletionResponse {
            message: Message::assistant(content),
            finish_reason,
            usage,
        })
    }
}

impl Stream for LlmStream {
    type Item = ChunkResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_recv(cx)
    }
}

/// Producing end held by the provider task
#[derive(Clone)]
pub struct LlmStreamSender {
    sender: mpsc::Sender<ChunkResult>,
}

impl LlmStreamSender {
    pub async fn send(&self, chunk: StreamChunk) -> SendResult {
        self.sender.send(Ok(chunk)).await
    }

    pub async fn send_error(&self, error: LlmError) -> SendResult {
        self.sender.send(Err(error)).await
    }

    pub async fn send_text(&self, text: impl Into<String>) -> SendResult {
        self.send(StreamChunk::text(text)).await
    }

    pub async fn send_finish(&self, reason: FinishReason, usage: Option<TokenUsage>) -> SendResult {
        self.send(StreamChunk::finish(reason, usage)).await
    }
}
