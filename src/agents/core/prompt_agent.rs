//! Prompt-template agent backing every built-in specialization

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;

use super::{render_prompt, Agent, TextStream};
use crate::agents::config::AgentProfile;
use crate::agents::domain::{AgentCapabilities, AgentHealth, AgentKind, Message, Role};
use crate::agents::error::{AgentError, AgentResult};
use crate::agents::llm::{CompletionRequest, LlmProvider};
use crate::agents::memory::ConversationMemory;

/// Agent that wraps a fixed instruction template around the remote model
pub struct PromptAgent {
    profile: AgentProfile,
    llm: Arc<dyn LlmProvider>,
}

impl PromptAgent {
    pub fn new(profile: AgentProfile, llm: Arc<dyn LlmProvider>) -> Self {
        Self { profile, llm }
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    fn build_request(&self, input: &str, history: Option<&ConversationMemory>) -> CompletionRequest {
        let kind = self.profile.kind;
        let mut messages = vec![Message::system(render_prompt(
            &self.profile.system_prompt,
            input,
            kind,
        ))];

        if let Some(history) = history.filter(|_| self.profile.history_aware) {
            messages.extend(prior_turns(history, input));
        }

        let user_prompt = match &self.profile.prompt_template {
            Some(template) => render_prompt(template, input, kind),
            None => input.to_string(),
        };
        messages.push(Message::user(user_prompt));

        CompletionRequest::new(messages)
            .with_temperature(self.profile.temperature)
            .with_max_tokens(self.profile.max_tokens)
    }
}

/// Conversation turns before the current request
///
/// The orchestrator records the user turn before routing, so a trailing user
/// message equal to `input` is dropped.
pub(crate) fn prior_turns(history: &ConversationMemory, input: &str) -> Vec<Message> {
    let mut turns = history.get_for_completion(false);
    if turns
        .last()
        .is_some_and(|m| m.role == Role::User && m.content == input)
    {
        turns.pop();
    }
    turns
}

#[async_trait]
impl Agent for PromptAgent {
    fn kind(&self) -> AgentKind {
        self.profile.kind
    }

    async fn process(&self, input: &str) -> AgentResult<String> {
        let request = self.build_request(input, None);
        let response = self.llm.complete(request).await?;
        tracing::debug!("{} agent produced {} chars", self.profile.kind, response.message.content.len());
        Ok(response.message.content)
    }

    fn supports_history(&self) -> bool {
        self.profile.history_aware
    }

    async fn process_with_history(
        &self,
        input: &str,
        history: &ConversationMemory,
    ) -> AgentResult<String> {
        let request = self.build_request(input, Some(history));
        let response = self.llm.complete(request).await?;
        Ok(response.message.content)
    }

    fn stream_process(&self, input: &str, history: Option<&ConversationMemory>) -> Option<TextStream> {
        if !self.profile.streaming {
            return None;
        }

        let stream = self
            .llm
            .complete_stream(self.build_request(input, history))
            .text_deltas()
            .map(|delta| delta.map_err(AgentError::from));

        Some(stream.boxed())
    }

    fn describe_capabilities(&self) -> AgentCapabilities {
        AgentCapabilities {
            agent_type: self.profile.kind,
            capabilities: self.profile.capabilities.clone(),
            specialization: self.profile.specialization.clone(),
        }
    }

    fn status(&self) -> AgentHealth {
        if self.profile.system_prompt.trim().is_empty() {
            AgentHealth::Error("system prompt is empty".to_string())
        } else {
            AgentHealth::Active
        }
    }
}
