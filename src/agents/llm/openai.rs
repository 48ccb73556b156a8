//! OpenAI LLM Provider with streaming support

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::env;

use super::{
    CompletionRequest, CompletionResponse, FinishReason, LlmProvider, LlmStream, LlmStreamSender,
    StreamChunk, TokenUsage,
};
use crate::agents::config::LlmProviderConfig;
use crate::agents::domain::Message;
use crate::agents::error::{LlmError, LlmResult};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// How the API key is presented to the endpoint
#[derive(Clone)]
pub(crate) enum AuthHeader {
    /// `Authorization: Bearer <key>` (OpenAI)
    Bearer(String),
    /// `api-key: <key>` (Azure OpenAI)
    ApiKey(String),
}

impl AuthHeader {
    fn apply(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            AuthHeader::Bearer(key) => builder.header("Authorization", format!("Bearer {}", key)),
            AuthHeader::ApiKey(key) => builder.header("api-key", key),
        }
    }
}

/// OpenAI-compatible chat completions provider
pub struct OpenAiProvider {
    client: reqwest::Client,
    name: &'static str,
    completions_url: String,
    auth: AuthHeader,
    model: String,
    default_temperature: Option<f32>,
    default_max_tokens: Option<u32>,
}

impl OpenAiProvider {
    /// Create a new OpenAI provider from configuration
    pub fn new(config: &LlmProviderConfig) -> LlmResult<Self> {
        let api_key = resolve_api_key(config.api_key_env.as_deref(), "OPENAI_API_KEY")?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Ok(Self::with_endpoint(
            "openai",
            format!("{}/chat/completions", base_url.trim_end_matches('/')),
            AuthHeader::Bearer(api_key),
            config,
        ))
    }

    /// Create a provider for an explicit endpoint and auth scheme
    pub(crate) fn with_endpoint(
        name: &'static str,
        completions_url: String,
        auth: AuthHeader,
        config: &LlmProviderConfig,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            name,
            completions_url,
            auth,
            model: config.model.clone(),
            default_temperature: config.temperature,
            default_max_tokens: config.max_tokens,
        }
    }

    /// Build the request body for OpenAI API
    fn build_request_body(&self, request: &CompletionRequest) -> Value {
        let mut body = json!({
            "model": request.model.as_ref().unwrap_or(&self.model),
            "messages": convert_messages(&request.messages),
        });

        if let Some(temp) = request.temperature.or(self.default_temperature) {
            body["temperature"] = json!(temp);
        }

        if let Some(max_tokens) = request.max_tokens.or(self.default_max_tokens) {
            body["max_tokens"] = json!(max_tokens);
        }

        if let Some(stop) = &request.stop {
            body["stop"] = json!(stop);
        }

        if request.stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({ "include_usage": true });
        }

        body
    }

    fn post(client: &reqwest::Client, url: &str, auth: &AuthHeader, body: &Value) -> reqwest::RequestBuilder {
        auth.apply(client.post(url))
            .header("Content-Type", "application/json")
            .json(body)
    }

    async fn stream_completion(
        request: reqwest::RequestBuilder,
        sender: LlmStreamSender,
    ) -> LlmResult<()> {
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(api_error(status.as_u16(), error_text));
        }

        let mut stream = response.bytes_stream();
        let mut lines = SseLineBuffer::default();

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| LlmError::Streaming(e.to_string()))?;
            lines.extend(&chunk);

            while let Some(line) = lines.next_line()? {
                match parse_sse_line(line.trim()) {
                    SseLine::Done => return Ok(()),
                    SseLine::Chunk(chunk) => {
                        if sender.send(chunk).await.is_err() {
                            return Ok(()); // Receiver dropped
                        }
                    }
                    SseLine::Skip => {}
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse> {
        let body = self.build_request_body(&request);

        let response = Self::post(&self.client, &self.completions_url, &self.auth, &body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(api_error(status.as_u16(), error_text));
        }

        let openai_response: OpenAiResponse = response.json().await.map_err(|e| {
            LlmError::Parse(format!("Failed to parse response: {}", e))
        })?;

        parse_response(openai_response)
    }

    fn complete_stream(&self, request: CompletionRequest) -> LlmStream {
        let (sender, stream) = LlmStream::channel(64);

        let mut req = request;
        req.stream = true;
        let body = self.build_request_body(&req);
        let http_request = Self::post(&self.client, &self.completions_url, &self.auth, &body);

        tokio::spawn(async move {
            let result = Self::stream_completion(http_request, sender.clone()).await;
            if let Err(e) = result {
                let _ = sender.send_error(e).await;
            }
        });

        stream
    }
}

/// Read the API key from the configured environment variable, or the default one
pub(crate) fn resolve_api_key(env_var: Option<&str>, default_env: &str) -> LlmResult<String> {
    let name = env_var.unwrap_or(default_env);
    env::var(name).map_err(|_| {
        LlmError::Authentication(format!("Environment variable {} not set", name))
    })
}

fn api_error(status: u16, message: String) -> LlmError {
    match status {
        401 | 403 => LlmError::Authentication(message),
        429 => LlmError::RateLimited { retry_after_ms: 0 },
        _ => LlmError::Api { status, message },
    }
}

/// Convert internal messages to OpenAI format
fn convert_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| json!({ "role": m.role.to_string(), "content": m.content }))
        .collect()
}

/// Parse a non-streaming response
fn parse_response(response: OpenAiResponse) -> LlmResult<CompletionResponse> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::Parse("No choices in response".to_string()))?;

    let finish_reason = choice
        .finish_reason
        .as_deref()
        .map(FinishReason::from_openai)
        .unwrap_or(FinishReason::Stop);

    if finish_reason == FinishReason::ContentFilter && choice.message.content.is_none() {
        return Err(LlmError::ContentFiltered);
    }

    Ok(CompletionResponse {
        message: Message::assistant(choice.message.content.unwrap_or_default()),
        finish_reason,
        usage: response.usage.map(Into::into),
    })
}

#[derive(Debug)]
enum SseLine {
    Chunk(StreamChunk),
    Done,
    Skip,
}

/// Raw response bytes split into complete lines
///
/// Network chunks may end inside a multi-byte character, so bytes are only
/// decoded once their line is complete.
#[derive(Debug, Default)]
struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    fn next_line(&mut self) -> LlmResult<Option<String>> {
        let Some(pos) = self.pending.iter().position(|b| *b == b'\n') else {
            return Ok(None);
        };

        let line: Vec<u8> = self.pending.drain(..=pos).collect();
        let text = std::str::from_utf8(&line[..pos])
            .map_err(|e| LlmError::Parse(format!("Invalid UTF-8 in stream: {}", e)))?;
        Ok(Some(text.to_string()))
    }
}

/// Parse one server-sent-events line
fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.strip_prefix("data: ") else {
        return SseLine::Skip;
    };

    if data == "[DONE]" {
        return SseLine::Done;
    }

    let Ok(parsed) = serde_json::from_str::<OpenAiStreamResponse>(data) else {
        tracing::debug!("Skipping unparseable stream line: {}", data);
        return SseLine::Skip;
    };

    let choice = parsed.choices.into_iter().next();
    let usage = parsed.usage.map(Into::into);

    match choice {
        Some(choice) => SseLine::Chunk(StreamChunk {
            content: choice.delta.content.unwrap_or_default(),
            finish_reason: choice.finish_reason.as_deref().map(FinishReason::from_openai),
            usage,
        }),
        // The usage-only chunk sent with stream_options has no choices
        None if usage.is_some() => SseLine::Chunk(StreamChunk {
            content: String::new(),
            finish_reason: None,
            usage,
        }),
        None => SseLine::Skip,
    }
}

// OpenAI API response types

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<OpenAiUsage> for TokenUsage {
    fn from(u: OpenAiUsage) -> Self {
        TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamResponse {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiDelta {
    content: Option<String>,
}
