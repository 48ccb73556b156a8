//! Core agent abstractions
//!
//! Every specialized agent (Chat, Analysis, Grading, Formatting, CodeReview)
//! is a [`PromptAgent`] driven by an [`AgentProfile`]. The orchestrator only
//! sees the [`Agent`] trait, so custom implementations can be registered too.

mod prompt_agent;

pub use prompt_agent::PromptAgent;
pub(crate) use prompt_agent::prior_turns;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tera::{Context, Tera};

use crate::agents::config::{AgentOverrides, AgentProfile};
use crate::agents::domain::{AgentCapabilities, AgentHealth, AgentKind};
use crate::agents::error::AgentResult;
use crate::agents::llm::LlmProvider;
use crate::agents::memory::ConversationMemory;

/// Incremental text output of an agent
pub type TextStream = BoxStream<'static, AgentResult<String>>;

/// Capability contract every agent implements
#[async_trait]
pub trait Agent: Send + Sync {
    /// Which specialized agent this is
    fn kind(&self) -> AgentKind;

    /// Turn one request into one response
    async fn process(&self, input: &str) -> AgentResult<String>;

    /// Whether [`Agent::process_with_history`] uses the conversation
    fn supports_history(&self) -> bool {
        false
    }

    /// Process with prior conversation turns; defaults to [`Agent::process`]
    async fn process_with_history(
        &self,
        input: &str,
        _history: &ConversationMemory,
    ) -> AgentResult<String> {
        self.process(input).await
    }

    /// Stream the response in fragments
    ///
    /// `None` means the agent cannot stream and the caller should use `process`.
    fn stream_process(&self, _input: &str, _history: Option<&ConversationMemory>) -> Option<TextStream> {
        None
    }

    fn describe_capabilities(&self) -> AgentCapabilities;

    fn status(&self) -> AgentHealth {
        AgentHealth::Active
    }
}

/// Render a prompt template with the request text available as `{{ input }}`
///
/// Falls back to the raw template if rendering fails.
pub fn render_prompt(template: &str, input: &str, agent: AgentKind) -> String {
    // If there's nothing that looks like a template, return as-is
    if !template.contains("{{") && !template.contains("{%") {
        return template.to_string();
    }

    let mut context = Context::new();
    context.insert("input", input);
    context.insert("agent", agent.as_str());

    match Tera::one_off(template, &context, false) {
        Ok(rendered) => rendered,
        Err(e) => {
            tracing::warn!("Failed to render prompt template for {} agent: {}", agent, e);
            template.to_string()
        }
    }
}

/// The set of agents an orchestrator can route to
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<AgentKind, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register all five built-in agents
    pub fn with_defaults(
        llm: Arc<dyn LlmProvider>,
        temperature: f32,
        overrides: &BTreeMap<AgentKind, AgentOverrides>,
    ) -> Self {
        let mut registry = Self::new();
        for kind in AgentKind::ALL {
            let mut profile = AgentProfile::default_for(kind, temperature);
            if let Some(o) = overrides.get(&kind) {
                profile.apply(o);
            }
            registry.register(Arc::new(PromptAgent::new(profile, llm.clone())));
        }
        registry
    }

    /// Register an agent, replacing any previous agent of the same kind
    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        self.agents.insert(agent.kind(), agent);
    }

    pub fn remove(&mut self, kind: AgentKind) -> Option<Arc<dyn Agent>> {
        self.agents.remove(&kind)
    }

    pub fn get(&self, kind: AgentKind) -> Option<&Arc<dyn Agent>> {
        self.agents.get(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AgentKind, &Arc<dyn Agent>)> {
        self.agents.iter()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
