//! Streaming execution: each agent step streams into the memory slot and
//! out to the caller as `Status -> Chunk* -> Complete | Error`

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde_json::Map;

use super::workflow::{apology, emit};
use super::Inner;
use crate::agents::core::TextStream;
use crate::agents::domain::{AgentKind, EventSender, StreamEvent};
use crate::agents::error::{AgentError, AgentResult, LlmError};

/// Channel capacity between the producer task and the caller
pub const STREAM_BUFFER: usize = 64;

/// Run the whole workflow for an admitted input, reporting through `tx`
pub(super) async fn drive(inner: Arc<Inner>, input: String, tx: EventSender) {
    let started = Instant::now();
    inner.memory.lock().await.add_user(&input);

    let state = inner.run(input, Some(&tx)).await;

    if state.is_cancelled() {
        inner.memory.lock().await.cancel_streaming();
        tracing::debug!("Stream consumer went away after {:?}", started.elapsed());
        return;
    }

    let response = state.response.unwrap_or_default();
    let event = if state.error.is_some() {
        inner
            .memory
            .lock()
            .await
            .add_assistant(&response, Some("error"), Map::new());
        StreamEvent::error(response, None)
    } else {
        StreamEvent::complete(response, None)
    };

    if tx.send(event).await.is_err() {
        tracing::debug!("Stream consumer went away before the final event");
    } else {
        tracing::debug!("Streamed response in {:?}", started.elapsed());
    }
}

/// Run one agent and stream its output
///
/// Agents without a streaming capability, and kinds with no registered agent,
/// produce their whole reply as a single chunk.
pub(super) async fn stream_step(
    inner: &Inner,
    kind: AgentKind,
    input: &str,
    tx: &EventSender,
) -> AgentResult<String> {
    let agent = kind.as_str();
    emit(Some(tx), StreamEvent::status(format!("{} agent is working...", agent), Some(agent))).await?;

    let started = Instant::now();
    let native = {
        let history = inner.memory.lock().await.clone();
        inner
            .agents
            .get(kind)
            .and_then(|a| a.stream_process(input, Some(&history)))
    };

    let native_stream = native.is_some();
    let mut chunks: TextStream = match native {
        Some(s) => s,
        None => match inner.invoke_agent(kind, input).await {
            Ok(text) => stream::once(async move { Ok(text) }).boxed(),
            Err(e) => {
                let _ = tx.send(StreamEvent::error(apology(&e.to_string()), Some(agent))).await;
                return Err(e);
            }
        },
    };

    if let Err(e) = inner.memory.lock().await.start_streaming(agent, Map::new()) {
        let _ = tx.send(StreamEvent::error(apology(&e.to_string()), Some(agent))).await;
        return Err(e);
    }

    let mut content = String::new();
    loop {
        let next = match tokio::time::timeout(inner.request_timeout, chunks.next()).await {
            Ok(next) => next,
            Err(_) => Some(Err(LlmError::Timeout.into())),
        };

        match next {
            Some(Ok(chunk)) => {
                if chunk.is_empty() {
                    continue;
                }
                inner.memory.lock().await.append_streaming_chunk(&chunk);
                content.push_str(&chunk);
                if tx.send(StreamEvent::chunk(chunk, Some(agent))).await.is_err() {
                    inner.memory.lock().await.cancel_streaming();
                    return Err(AgentError::Cancelled);
                }
            }
            Some(Err(e)) => {
                inner.memory.lock().await.cancel_streaming();
                tracing::error!("{} agent stream failed: {}", agent, e);
                let _ = tx.send(StreamEvent::error(apology(&e.to_string()), Some(agent))).await;
                let result = Err(e);
                if native_stream {
                    inner.record(agent, started, &result);
                }
                return result;
            }
            None => break,
        }
    }

    inner.memory.lock().await.finalize_streaming();
    if native_stream {
        inner.record(agent, started, &Ok(content.clone()));
    }

    emit(Some(tx), StreamEvent::complete(content.clone(), Some(agent))).await?;
    Ok(content)
}
