#![allow(dead_code)]

use async_trait::async_trait;
use maestro::adapters::rate_limit::RateLimiter;
use maestro::agents::llm::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider, LlmStream};
use maestro::agents::{LlmError, LlmResult, Message, Orchestrator, OrchestratorBuilder};
use maestro::config::RateLimitConfig;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// System prompt fragments that identify who is calling the model
const MARKERS: [(&str, &str); 7] = [
    ("You are a task classifier", "classifier"),
    ("You are handling a", "fallback"),
    ("conversational assistant", "chat"),
    ("data analysis specialist", "analysis"),
    ("grading agent", "grading"),
    ("formatting agent", "formatting"),
    ("code review specialist", "code_review"),
];

#[derive(Clone)]
enum Behavior {
    Reply(String),
    Fail,
    Delay(Duration, String),
}

/// Deterministic provider keyed on the caller's system prompt
///
/// The classifier answers with the configured label; every agent answers
/// `"<agent> response"` unless scripted otherwise. Streams split replies into
/// word chunks.
pub struct ScriptedProvider {
    label: Mutex<String>,
    behaviors: Mutex<HashMap<&'static str, Behavior>>,
    calls: AtomicUsize,
    calls_by_agent: Mutex<HashMap<&'static str, usize>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new(label: &str) -> Arc<Self> {
        Arc::new(Self {
            label: Mutex::new(label.to_string()),
            behaviors: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            calls_by_agent: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn set_label(&self, label: &str) {
        *self.label.lock().unwrap() = label.to_string();
    }

    pub fn reply(&self, agent: &'static str, text: &str) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(agent, Behavior::Reply(text.to_string()));
    }

    pub fn fail(&self, agent: &'static str) {
        self.behaviors.lock().unwrap().insert(agent, Behavior::Fail);
    }

    pub fn delay(&self, agent: &'static str, delay: Duration) {
        let text = format!("{} response", agent);
        self.behaviors
            .lock()
            .unwrap()
            .insert(agent, Behavior::Delay(delay, text));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, agent: &str) -> usize {
        self.calls_by_agent
            .lock()
            .unwrap()
            .get(agent)
            .copied()
            .unwrap_or(0)
    }

    pub fn requests_for(&self, agent: &str) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| agent_of(r) == agent)
            .cloned()
            .collect()
    }

    fn behavior(&self, request: &CompletionRequest) -> Behavior {
        let agent = agent_of(request);
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.calls_by_agent.lock().unwrap().entry(agent).or_insert(0) += 1;
        self.requests.lock().unwrap().push(request.clone());

        if let Some(behavior) = self.behaviors.lock().unwrap().get(agent) {
            return behavior.clone();
        }
        match agent {
            "classifier" => Behavior::Reply(self.label.lock().unwrap().clone()),
            other => Behavior::Reply(format!("{} response", other)),
        }
    }
}

pub fn agent_of(request: &CompletionRequest) -> &'static str {
    let system = request.system_prompt().unwrap_or("");
    MARKERS
        .iter()
        .find(|(marker, _)| system.contains(marker))
        .map(|(_, agent)| *agent)
        .unwrap_or("unknown")
}

fn response(text: String) -> CompletionResponse {
    CompletionResponse {
        message: Message::assistant(text),
        finish_reason: FinishReason::Stop,
        usage: None,
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse> {
        match self.behavior(&request) {
            Behavior::Reply(text) => Ok(response(text)),
            Behavior::Fail => Err(LlmError::Network("connection refused".to_string())),
            Behavior::Delay(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(response(text))
            }
        }
    }

    fn complete_stream(&self, request: CompletionRequest) -> LlmStream {
        let behavior = self.behavior(&request);
        let (tx, stream) = LlmStream::channel(16);

        tokio::spawn(async move {
            let text = match behavior {
                Behavior::Reply(text) => text,
                Behavior::Fail => {
                    let _ = tx.send_text("partial ").await;
                    let _ = tx
                        .send_error(LlmError::Streaming("stream reset".to_string()))
                        .await;
                    return;
                }
                Behavior::Delay(delay, text) => {
                    tokio::time::sleep(delay).await;
                    text
                }
            };

            for word in text.split_inclusive(' ') {
                if tx.send_text(word).await.is_err() {
                    return;
                }
            }
            let _ = tx.send_finish(FinishReason::Stop, None).await;
        });

        stream
    }
}

/// Builder with the scripted provider and a limiter generous enough for tests
pub fn builder(llm: Arc<ScriptedProvider>) -> OrchestratorBuilder {
    Orchestrator::builder()
        .llm(llm)
        .rate_limiter(Arc::new(RateLimiter::new(RateLimitConfig {
            enabled: true,
            max_calls: 1_000,
            period_seconds: 60,
        })))
}
