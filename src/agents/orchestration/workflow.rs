//! Classification and routing state machine
//!
//! ```text
//! Classify -> RouteStandard -------------------------------> ManageData -> Synthesize -> Done
//!          \-> RouteGrading (grading -> formatting -> notes?) -/
//! any state -> Error -> Done
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Instant;

use serde::Serialize;

use super::{streaming, Inner};
use crate::adapters::input_validator::ValidationErrorKind;
use crate::agents::core::prior_turns;
use crate::agents::domain::{AgentKind, EventSender, Message, StreamEvent};
use crate::agents::error::{AgentError, AgentResult, LlmError};
use crate::agents::llm::{estimate_tokens, CompletionRequest};
use crate::agents::memory::{DataContext, Interaction};

pub const CLASSIFIER_SYSTEM_PROMPT: &str =
    "You are a task classifier. Respond with only the category name.";

/// Words in a grading request that ask for a follow-up note from the chat agent
const NOTE_KEYWORDS: [&str; 4] = ["explain", "notes", "clarify", "details"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowNode {
    Classify,
    RouteStandard,
    RouteGrading,
    ManageData,
    Synthesize,
    Error,
    Done,
}

/// Scratchpad for one request
#[derive(Debug, Default)]
pub struct WorkflowState {
    pub user_input: String,
    pub error: Option<AgentError>,
    /// Agent that produces the primary response
    pub agent_type: Option<AgentKind>,
    pub task_classification: Option<AgentKind>,
    /// Output per agent label (`grading`, `formatting`, ...)
    pub agent_responses: BTreeMap<String, String>,
    pub data_context: DataContext,
    /// Routing nodes visited, in order
    pub workflow_path: Vec<&'static str>,
    pub formatted_output: Option<String>,
    pub additional_notes: Option<String>,
    /// Synthesized reply, or the apology after an error
    pub response: Option<String>,
}

impl WorkflowState {
    pub fn new(user_input: impl Into<String>) -> Self {
        Self {
            user_input: user_input.into(),
            ..Default::default()
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.error, Some(AgentError::Cancelled))
    }

    fn fail(&mut self, error: AgentError) -> WorkflowNode {
        self.error = Some(error);
        WorkflowNode::Error
    }
}

pub fn apology(message: &str) -> String {
    format!("I apologize, but I encountered an error: {}", message)
}

fn needs_notes(input: &str) -> bool {
    let lowered = input.to_lowercase();
    NOTE_KEYWORDS.iter().any(|k| lowered.contains(k))
}

fn classification_prompt(input: &str) -> String {
    format!(
        "Classify the request into exactly one category:\n\
         - chat: general conversation, questions and explanations\n\
         - analysis: data analysis, statistics, calculations, interpreting numbers or text\n\
         - grading: grading, scoring or assessing student work such as essays and answers\n\
         - code_review: reviewing, critiquing or improving source code\n\n\
         Request: {}\n\nCategory:",
        input
    )
}

fn notes_prompt(input: &str, report: &str) -> String {
    format!(
        "The user asked: {}\n\nAdd brief notes that explain or clarify this grading report:\n\n{}",
        input, report
    )
}

/// Forward an event when streaming; a closed stream means the caller went away
pub(super) async fn emit(events: Option<&EventSender>, event: StreamEvent) -> AgentResult<()> {
    match events {
        Some(tx) => tx.send(event).await.map_err(|_| AgentError::Cancelled),
        None => Ok(()),
    }
}

impl Inner {
    /// Drive one request from `Classify` to `Done`
    pub(super) async fn run(&self, input: String, events: Option<&EventSender>) -> WorkflowState {
        let mut state = WorkflowState::new(input);
        let mut node = WorkflowNode::Classify;

        loop {
            tracing::trace!("Workflow node {:?}", node);
            node = match node {
                WorkflowNode::Classify => self.classify_task(&mut state, events).await,
                WorkflowNode::RouteStandard => self.route_to_agent(&mut state, events).await,
                WorkflowNode::RouteGrading => self.grading_workflow(&mut state, events).await,
                WorkflowNode::ManageData => self.manage_data(&mut state).await,
                WorkflowNode::Synthesize => synthesize_response(&mut state),
                WorkflowNode::Error => handle_error(&mut state),
                WorkflowNode::Done => break,
            };
        }

        state
    }

    async fn classify_task(&self, state: &mut WorkflowState, events: Option<&EventSender>) -> WorkflowNode {
        state.workflow_path.push("classify_task");

        if state.user_input.trim().is_empty() {
            return state.fail(AgentError::Validation(ValidationErrorKind::EmptyInput.to_string()));
        }

        if let Err(e) = emit(events, StreamEvent::status("Classifying request...", None)).await {
            return state.fail(e);
        }

        let kind = match self.classify(&state.user_input).await {
            Ok(kind) => kind,
            Err(e) => return state.fail(e),
        };
        tracing::info!("Classified request as {}", kind);
        state.task_classification = Some(kind);
        state.agent_type = Some(kind);

        if let Err(e) = emit(events, StreamEvent::status(format!("Routing to {}", kind), None)).await {
            return state.fail(e);
        }

        if kind == AgentKind::Grading {
            WorkflowNode::RouteGrading
        } else {
            WorkflowNode::RouteStandard
        }
    }

    /// Ask the model for a category label; anything unrecognized becomes chat
    async fn classify(&self, input: &str) -> AgentResult<AgentKind> {
        let request = CompletionRequest::new(vec![
            Message::system(CLASSIFIER_SYSTEM_PROMPT),
            Message::user(classification_prompt(input)),
        ])
        .with_temperature(Some(0.0));

        let started = Instant::now();
        let result = self.with_timeout(self.llm.complete(request)).await;
        let elapsed = started.elapsed().as_secs_f64();

        let response = match result {
            Ok(response) => {
                self.metrics.record("classifier", elapsed, true, None);
                response
            }
            Err(e) => {
                self.metrics.record("classifier", elapsed, false, Some(&e.to_string()));
                return Err(e);
            }
        };

        let label = response.message.content;
        Ok(AgentKind::from_label(&label).unwrap_or_else(|| {
            tracing::warn!("Unrecognized classification '{}', defaulting to chat", label.trim());
            AgentKind::Chat
        }))
    }

    async fn route_to_agent(&self, state: &mut WorkflowState, events: Option<&EventSender>) -> WorkflowNode {
        state.workflow_path.push("route_to_agent");

        let kind = state.agent_type.unwrap_or(AgentKind::Chat);
        let input = state.user_input.clone();
        match self.run_step(kind, &input, events).await {
            Ok(text) => {
                state.agent_responses.insert(kind.as_str().to_string(), text);
                WorkflowNode::ManageData
            }
            Err(e) => state.fail(e),
        }
    }

    /// Grading, then formatting of the grade, then optional notes
    async fn grading_workflow(&self, state: &mut WorkflowState, events: Option<&EventSender>) -> WorkflowNode {
        state.workflow_path.push("grading_workflow_entry");
        let input = state.user_input.clone();

        state.workflow_path.push("route_to_grading");
        let grading = match self.run_step(AgentKind::Grading, &input, events).await {
            Ok(text) => text,
            Err(e) => return state.fail(e),
        };
        state
            .agent_responses
            .insert(AgentKind::Grading.as_str().to_string(), grading.clone());

        state.workflow_path.push("route_to_formatting");
        let formatted = match self.run_step(AgentKind::Formatting, &grading, events).await {
            Ok(text) => {
                state
                    .agent_responses
                    .insert(AgentKind::Formatting.as_str().to_string(), text.clone());
                text
            }
            Err(AgentError::Cancelled) => return state.fail(AgentError::Cancelled),
            Err(e) => {
                tracing::warn!("Formatting failed, using raw grading output: {}", e);
                grading
            }
        };
        state.formatted_output = Some(formatted.clone());

        if needs_notes(&input) {
            state.workflow_path.push("route_to_chat_notes");
            match self
                .run_step(AgentKind::Chat, &notes_prompt(&input, &formatted), events)
                .await
            {
                Ok(notes) => {
                    state
                        .agent_responses
                        .insert(AgentKind::Chat.as_str().to_string(), notes.clone());
                    state.additional_notes = Some(notes);
                }
                Err(e) => return state.fail(e),
            }
        }

        WorkflowNode::ManageData
    }

    /// Look up related prior interactions, then record this one
    ///
    /// Best effort: store failures are logged and the request carries on.
    async fn manage_data(&self, state: &mut WorkflowState) -> WorkflowNode {
        match self.interactions.relevant(&state.user_input, self.max_context).await {
            Ok(context) => state.data_context = context,
            Err(e) => tracing::warn!("Failed to search prior interactions: {}", e),
        }

        let interaction = Interaction::new(
            state.user_input.clone(),
            state.task_classification.unwrap_or(AgentKind::Chat),
            state.agent_responses.clone(),
        );
        if let Err(e) = self.interactions.store(&interaction).await {
            tracing::warn!("Failed to store interaction: {}", e);
        }

        WorkflowNode::Synthesize
    }

    async fn run_step(&self, kind: AgentKind, input: &str, events: Option<&EventSender>) -> AgentResult<String> {
        match events {
            Some(tx) => streaming::stream_step(self, kind, input, tx).await,
            None => self.invoke_agent(kind, input).await,
        }
    }

    /// One blocking agent call with timeout and metrics
    pub(super) async fn invoke_agent(&self, kind: AgentKind, input: &str) -> AgentResult<String> {
        let started = Instant::now();
        let result = match self.agents.get(kind) {
            Some(agent) if agent.supports_history() => {
                let history = self.memory.lock().await.clone();
                self.with_timeout(agent.process_with_history(input, &history)).await
            }
            Some(agent) => self.with_timeout(agent.process(input)).await,
            None => {
                tracing::warn!("No {} agent registered, calling the model directly", kind);
                self.direct_completion(kind, input).await
            }
        };
        self.record(kind.as_str(), started, &result);
        result
    }

    async fn direct_completion(&self, kind: AgentKind, input: &str) -> AgentResult<String> {
        let history = self.memory.lock().await.clone();
        let mut messages = vec![Message::system(format!("You are handling a {} task.", kind))];
        messages.extend(prior_turns(&history, input));
        messages.push(Message::user(input));

        let response = self
            .with_timeout(self.llm.complete(CompletionRequest::new(messages)))
            .await?;
        Ok(response.message.content)
    }

    pub(super) async fn with_timeout<T, E>(&self, fut: impl Future<Output = Result<T, E>>) -> AgentResult<T>
    where
        E: Into<AgentError>,
    {
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(LlmError::Timeout.into()),
        }
    }

    pub(super) fn record(&self, agent: &str, started: Instant, result: &AgentResult<String>) {
        let elapsed = started.elapsed().as_secs_f64();
        match result {
            Ok(text) => {
                self.metrics.record(agent, elapsed, true, None);
                self.metrics.record_tokens(agent, estimate_tokens(text));
            }
            Err(e) => self.metrics.record(agent, elapsed, false, Some(&e.to_string())),
        }
    }
}

fn synthesize_response(state: &mut WorkflowState) -> WorkflowNode {
    let mut response = match &state.formatted_output {
        Some(formatted) => {
            let mut text = formatted.clone();
            if let Some(notes) = &state.additional_notes {
                text.push_str("\n\nAdditional notes:\n");
                text.push_str(notes);
            }
            text
        }
        None => state
            .agent_type
            .and_then(|kind| state.agent_responses.get(kind.as_str()).cloned())
            .unwrap_or_default(),
    };

    let n = state.data_context.context_count;
    if n > 0 {
        response.push_str(&format!("\n\n[Context: Based on {} previous interactions]", n));
    }

    state.response = Some(response);
    WorkflowNode::Done
}

fn handle_error(state: &mut WorkflowState) -> WorkflowNode {
    let message = match &state.error {
        Some(AgentError::Cancelled) => {
            tracing::debug!("Request cancelled by the caller");
            AgentError::Cancelled.to_string()
        }
        Some(e) => {
            tracing::error!("Workflow failed: {}", e);
            e.to_string()
        }
        None => "unknown error".to_string(),
    };

    state.response = Some(apology(&message));
    WorkflowNode::Done
}
