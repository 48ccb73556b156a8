//! Request orchestration
//!
//! [`Orchestrator`] classifies each request, routes it to a specialized agent
//! (or through the grading pipeline), records the interaction and synthesizes
//! the reply. Around that workflow it applies input validation, per-session
//! rate limiting, response caching and metrics.
//!
//! - `workflow`: the state machine shared by blocking and streaming requests
//! - `streaming`: per-step streaming into memory and the caller's event stream

mod streaming;
mod workflow;

pub use streaming::STREAM_BUFFER;
pub use workflow::{apology, WorkflowNode, WorkflowState, CLASSIFIER_SYSTEM_PROMPT};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Map};
use tokio::sync::Mutex;

use crate::adapters::input_validator::InputValidator;
use crate::adapters::metrics::{MetricsCollector, MetricsSnapshot};
use crate::adapters::rate_limit::RateLimiter;
use crate::adapters::response_cache::{CacheStats, ResponseCache};
use crate::agents::config::AgentOverrides;
use crate::agents::core::AgentRegistry;
use crate::agents::domain::{AgentCapabilities, AgentHealth, AgentKind, EventStream};
use crate::agents::error::{AgentError, AgentResult, ChatError};
use crate::agents::llm::{create_provider, LlmProvider};
use crate::agents::memory::{
    ConversationMemory, FileInteractionStore, InMemoryInteractionStore, InteractionStore, MemoryStats,
};
use crate::config::{RateLimitConfig, Settings};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_CONTEXT: usize = 5;

/// Components shared by every request of one orchestrator
struct Inner {
    llm: Arc<dyn LlmProvider>,
    agents: AgentRegistry,
    memory: Mutex<ConversationMemory>,
    interactions: Arc<dyn InteractionStore>,
    cache: Arc<ResponseCache>,
    rate_limiter: Arc<RateLimiter>,
    validator: InputValidator,
    metrics: Arc<MetricsCollector>,
    request_timeout: Duration,
    max_context: usize,
    metrics_export_path: Option<PathBuf>,
}

/// Outcome of a blocking request, with the route it took
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatTrace {
    pub response: String,
    /// `None` for cache hits
    pub classification: Option<AgentKind>,
    pub workflow_path: Vec<&'static str>,
    /// Prior interactions that matched the request
    pub context_count: usize,
    pub cached: bool,
    /// The reply is an apology for a failed workflow
    pub failed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistorySummary {
    pub stats: MemoryStats,
    pub recent_context: String,
    pub total_messages: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorInfo {
    pub provider: String,
    pub model: String,
    pub agents: Vec<AgentCapabilities>,
    pub cache: CacheStats,
    pub rate_limit: RateLimitConfig,
    pub metrics_enabled: bool,
    pub max_messages: usize,
    pub request_timeout_seconds: u64,
}

/// Multi-agent orchestrator for one conversation
///
/// Cheap to clone; clones share the same memory and components.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    /// Build every component from settings and load any saved history
    pub async fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let llm = create_provider(&settings.llm)?;
        Self::from_settings_with_provider(settings, llm).await
    }

    /// Like [`Orchestrator::from_settings`] with an already constructed provider
    pub async fn from_settings_with_provider(
        settings: &Settings,
        llm: Arc<dyn LlmProvider>,
    ) -> anyhow::Result<Self> {
        let mut memory = ConversationMemory::new(settings.memory.max_messages);
        if settings.memory.persist_history {
            memory = memory.with_storage(&settings.memory.history_file);
            match memory.load_from_disk().await {
                Ok(true) => tracing::info!("Restored {} messages of conversation history", memory.len()),
                Ok(false) => {}
                Err(e) => tracing::warn!("Ignoring unreadable conversation history: {}", e),
            }
        }

        let interactions: Arc<dyn InteractionStore> = if settings.data.persist {
            Arc::new(FileInteractionStore::new(&settings.data.interactions_file))
        } else {
            Arc::new(InMemoryInteractionStore::new())
        };

        let orchestrator = Self::builder()
            .llm(llm)
            .agent_temperature(settings.agent.temperature)
            .agent_overrides(settings.agents.clone())
            .memory(memory)
            .interactions(interactions)
            .cache(Arc::new(ResponseCache::new(settings.cache.clone())))
            .rate_limiter(Arc::new(RateLimiter::new(settings.rate_limit.clone())))
            .validator(InputValidator::new(settings.validation.max_input_length))
            .metrics(Arc::new(MetricsCollector::with_config(&settings.metrics)?))
            .request_timeout(Duration::from_secs(settings.agent.request_timeout_seconds))
            .max_context(settings.data.max_context)
            .metrics_export_path(settings.metrics.export_path.clone())
            .build()?;

        Ok(orchestrator)
    }

    /// Answer one request
    ///
    /// Only validation and rate-limit rejections are errors; any other failure
    /// comes back as an apology text.
    pub async fn chat(&self, input: &str, session_id: &str) -> Result<String, ChatError> {
        self.chat_with_trace(input, session_id)
            .await
            .map(|trace| trace.response)
    }

    /// [`Orchestrator::chat`], also reporting classification and route
    pub async fn chat_with_trace(&self, input: &str, session_id: &str) -> Result<ChatTrace, ChatError> {
        let input = self.admit(input, session_id).await?;
        let inner = &self.inner;

        let context = inner.memory.lock().await.len().to_string();
        if let Some(cached) = inner.cache.get(&input, &context).await {
            tracing::debug!("Cache hit for session {}", session_id);
            return Ok(ChatTrace {
                response: cached,
                classification: None,
                workflow_path: Vec::new(),
                context_count: 0,
                cached: true,
                failed: false,
            });
        }

        inner.memory.lock().await.add_user(&input);
        let state = inner.run(input.clone(), None).await;
        let response = state.response.clone().unwrap_or_default();
        let failed = state.error.is_some();

        if failed {
            inner
                .memory
                .lock()
                .await
                .add_assistant(&response, Some("error"), Map::new());
        } else {
            let mut metadata = Map::new();
            metadata.insert("workflow_path".to_string(), json!(state.workflow_path));
            metadata.insert("context_count".to_string(), json!(state.data_context.context_count));
            inner.memory.lock().await.add_assistant(
                &response,
                state.task_classification.map(|k| k.as_str()),
                metadata,
            );
            inner.cache.set(&input, &context, response.clone()).await;
        }

        Ok(ChatTrace {
            response,
            classification: state.task_classification,
            workflow_path: state.workflow_path,
            context_count: state.data_context.context_count,
            cached: false,
            failed,
        })
    }

    /// Answer one request as a stream of events
    ///
    /// Rejections are returned before any event is produced. Dropping the
    /// returned stream cancels the request.
    pub async fn chat_streaming(&self, input: &str, session_id: &str) -> Result<EventStream, ChatError> {
        let input = self.admit(input, session_id).await?;

        let (tx, stream) = EventStream::channel(STREAM_BUFFER);
        let inner = self.inner.clone();
        tokio::spawn(async move {
            streaming::drive(inner, input, tx).await;
        });

        Ok(stream)
    }

    /// Validate, rate limit, then sanitize
    async fn admit(&self, input: &str, session_id: &str) -> Result<String, ChatError> {
        let outcome = self.inner.validator.validate(input);
        if let Some(kind) = outcome.error {
            tracing::debug!("Rejected input for session {}: {}", session_id, kind);
            return Err(ChatError::InputValidation { kind });
        }

        let decision = self.inner.rate_limiter.check_and_record(session_id).await;
        if !decision.allowed {
            tracing::debug!(
                "Session {} rate limited for {}s",
                session_id,
                decision.retry_after_secs
            );
            return Err(ChatError::RateLimited {
                retry_after_secs: decision.retry_after_secs,
            });
        }

        Ok(self.inner.validator.sanitize(input))
    }

    pub async fn conversation_history(&self) -> HistorySummary {
        let memory = self.inner.memory.lock().await;
        HistorySummary {
            stats: memory.stats(),
            recent_context: memory.recent_context_string(5),
            total_messages: memory.len(),
        }
    }

    pub async fn clear_conversation_history(&self) {
        self.inner.memory.lock().await.clear();
        tracing::info!("Cleared conversation history");
    }

    /// Returns `false` when nothing was written (no storage path, or an I/O failure)
    pub async fn save_conversation_history(&self) -> bool {
        let memory = self.inner.memory.lock().await.clone();
        match memory.save_to_disk().await {
            Ok(saved) => saved,
            Err(e) => {
                tracing::error!("Failed to save conversation history: {}", e);
                false
            }
        }
    }

    pub async fn delete_saved_history(&self) -> bool {
        let memory = self.inner.memory.lock().await.clone();
        match memory.delete_saved_history().await {
            Ok(deleted) => deleted,
            Err(e) => {
                tracing::error!("Failed to delete saved history: {}", e);
                false
            }
        }
    }

    /// Change the history bound, dropping the oldest messages over it
    pub async fn set_history_limit(&self, max_messages: usize) {
        self.inner.memory.lock().await.set_max_messages(max_messages);
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats().await
    }

    pub async fn clear_cache(&self) {
        self.inner.cache.clear().await;
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Prometheus text exposition of the collected metrics
    pub fn encode_metrics(&self) -> anyhow::Result<String> {
        self.inner.metrics.encode()
    }

    pub async fn export_metrics(&self, path: &Path) -> anyhow::Result<()> {
        self.inner.metrics.export_to_file(path).await
    }

    pub fn agent_status(&self) -> BTreeMap<AgentKind, AgentHealth> {
        self.inner
            .agents
            .iter()
            .map(|(kind, agent)| (*kind, agent.status()))
            .collect()
    }

    pub async fn info(&self) -> OrchestratorInfo {
        let inner = &self.inner;
        OrchestratorInfo {
            provider: inner.llm.name().to_string(),
            model: inner.llm.model().to_string(),
            agents: inner
                .agents
                .iter()
                .map(|(_, agent)| agent.describe_capabilities())
                .collect(),
            cache: inner.cache.stats().await,
            rate_limit: inner.rate_limiter.config().clone(),
            metrics_enabled: inner.metrics.is_enabled(),
            max_messages: inner.memory.lock().await.max_messages(),
            request_timeout_seconds: inner.request_timeout.as_secs(),
        }
    }

    /// Persist history and export metrics when an export path is configured
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.save_conversation_history().await;

        if let Some(path) = &self.inner.metrics_export_path {
            self.export_metrics(path).await?;
        }

        tracing::info!("Orchestrator shut down");
        Ok(())
    }
}

/// Assembles an [`Orchestrator`]; only the LLM provider is required
pub struct OrchestratorBuilder {
    llm: Option<Arc<dyn LlmProvider>>,
    agents: Option<AgentRegistry>,
    agent_temperature: f32,
    agent_overrides: BTreeMap<AgentKind, AgentOverrides>,
    memory: Option<ConversationMemory>,
    interactions: Option<Arc<dyn InteractionStore>>,
    cache: Option<Arc<ResponseCache>>,
    rate_limiter: Option<Arc<RateLimiter>>,
    validator: Option<InputValidator>,
    metrics: Option<Arc<MetricsCollector>>,
    request_timeout: Duration,
    max_context: usize,
    metrics_export_path: Option<PathBuf>,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self {
            llm: None,
            agents: None,
            agent_temperature: 1.0,
            agent_overrides: BTreeMap::new(),
            memory: None,
            interactions: None,
            cache: None,
            rate_limiter: None,
            validator: None,
            metrics: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_context: DEFAULT_MAX_CONTEXT,
            metrics_export_path: None,
        }
    }
}

impl OrchestratorBuilder {
    pub fn llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Use this registry instead of the five built-in agents
    pub fn agents(mut self, agents: AgentRegistry) -> Self {
        self.agents = Some(agents);
        self
    }

    pub fn agent_temperature(mut self, temperature: f32) -> Self {
        self.agent_temperature = temperature;
        self
    }

    pub fn agent_overrides(mut self, overrides: BTreeMap<AgentKind, AgentOverrides>) -> Self {
        self.agent_overrides = overrides;
        self
    }

    pub fn memory(mut self, memory: ConversationMemory) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn interactions(mut self, store: Arc<dyn InteractionStore>) -> Self {
        self.interactions = Some(store);
        self
    }

    pub fn cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn validator(mut self, validator: InputValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// How many related prior interactions to look up per request
    pub fn max_context(mut self, max_context: usize) -> Self {
        self.max_context = max_context;
        self
    }

    pub fn metrics_export_path(mut self, path: Option<PathBuf>) -> Self {
        self.metrics_export_path = path;
        self
    }

    pub fn build(self) -> AgentResult<Orchestrator> {
        let llm = self
            .llm
            .ok_or_else(|| AgentError::Configuration("An LLM provider is required".to_string()))?;

        let agents = self.agents.unwrap_or_else(|| {
            AgentRegistry::with_defaults(llm.clone(), self.agent_temperature, &self.agent_overrides)
        });

        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => Arc::new(
                MetricsCollector::new().map_err(|e| AgentError::Configuration(e.to_string()))?,
            ),
        };

        tracing::info!(
            "Orchestrator ready: {} agents on {} ({})",
            agents.len(),
            llm.model(),
            llm.name()
        );

        Ok(Orchestrator {
            inner: Arc::new(Inner {
                llm,
                agents,
                memory: Mutex::new(self.memory.unwrap_or_default()),
                interactions: self
                    .interactions
                    .unwrap_or_else(|| Arc::new(InMemoryInteractionStore::new())),
                cache: self.cache.unwrap_or_default(),
                rate_limiter: self.rate_limiter.unwrap_or_default(),
                validator: self.validator.unwrap_or_default(),
                metrics,
                request_timeout: self.request_timeout,
                max_context: self.max_context,
                metrics_export_path: self.metrics_export_path,
            }),
        })
    }
}
