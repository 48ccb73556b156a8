//! Rolling conversation memory shared by every agent in a session

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::file::{self, HistorySnapshot};
use crate::agents::domain::{ConversationMessage, Message, Role};
use crate::agents::error::{AgentError, AgentResult};

/// Default number of messages kept in memory
pub const DEFAULT_MAX_MESSAGES: usize = 20;

/// Bounded FIFO message log with one optional in-progress streaming message
///
/// Length never exceeds `max_messages`; the oldest message is evicted first.
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    messages: VecDeque<ConversationMessage>,
    max_messages: usize,
    storage_path: Option<PathBuf>,
    streaming: Option<StreamingSlot>,
}

#[derive(Debug, Clone)]
struct StreamingSlot {
    agent_type: String,
    metadata: Map<String, Value>,
    buffer: String,
    started_at: DateTime<Utc>,
}

/// Summary counts over the current conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total_messages: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub system_messages: usize,
    /// Assistant messages per agent type
    pub agent_usage: BTreeMap<String, usize>,
    pub oldest_message: Option<DateTime<Utc>>,
    pub newest_message: Option<DateTime<Utc>>,
    pub max_messages: usize,
    pub streaming: bool,
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES)
    }
}

impl ConversationMemory {
    /// Create an in-memory conversation; `max_messages` is clamped to at least one
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            max_messages: max_messages.max(1),
            storage_path: None,
            streaming: None,
        }
    }

    /// Persist to and load from `path`
    pub fn with_storage(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = Some(path.into());
        self
    }

    pub fn storage_path(&self) -> Option<&Path> {
        self.storage_path.as_deref()
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    /// Change the bound, evicting the oldest messages immediately if needed
    pub fn set_max_messages(&mut self, max_messages: usize) {
        self.max_messages = max_messages.max(1);
        self.trim();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> impl Iterator<Item = &ConversationMessage> {
        self.messages.iter()
    }

    pub fn last(&self) -> Option<&ConversationMessage> {
        self.messages.back()
    }

    pub fn add_user(&mut self, content: impl Into<String>) {
        self.push(ConversationMessage::new(Role::User, content));
    }

    pub fn add_assistant(
        &mut self,
        content: impl Into<String>,
        agent_type: Option<&str>,
        metadata: Map<String, Value>,
    ) {
        let mut message = ConversationMessage::new(Role::Assistant, content).with_metadata(metadata);
        message.agent_type = agent_type.map(str::to_string);
        self.push(message);
    }

    pub fn add_system(&mut self, content: impl Into<String>) {
        self.push(ConversationMessage::new(Role::System, content));
    }

    fn push(&mut self, message: ConversationMessage) {
        self.messages.push_back(message);
        self.trim();
    }

    fn trim(&mut self) {
        while self.messages.len() > self.max_messages {
            self.messages.pop_front();
        }
    }

    /// Drop every message; an open streaming message is left untouched
    pub fn clear(&mut self) {
        self.messages.clear();
        tracing::info!("Conversation history cleared");
    }

    /// Messages in wire format, assistant turns labelled with their agent
    pub fn get_for_completion(&self, include_system: bool) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|m| include_system || m.role != Role::System)
            .map(ConversationMessage::to_completion_message)
            .collect()
    }

    /// Human-readable digest of the last `n` user/assistant messages
    pub fn recent_context_string(&self, n: usize) -> String {
        let recent: Vec<&ConversationMessage> = self
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .collect();
        let recent = &recent[recent.len().saturating_sub(n)..];

        if recent.is_empty() {
            return "No previous conversation context.".to_string();
        }

        let mut lines = vec!["Recent conversation context:".to_string()];
        for message in recent {
            let time = message.timestamp.format("%H:%M");
            let line = match (message.role, &message.agent_type) {
                (Role::User, _) => format!("[{}] User: {}", time, message.content),
                (_, Some(agent)) => format!("[{}] Assistant ({}): {}", time, agent, message.content),
                (_, None) => format!("[{}] Assistant: {}", time, message.content),
            };
            lines.push(line);
        }
        lines.join("\n")
    }

    pub fn stats(&self) -> MemoryStats {
        let count = |role: Role| self.messages.iter().filter(|m| m.role == role).count();

        let mut agent_usage = BTreeMap::new();
        for message in self.messages.iter().filter(|m| m.role == Role::Assistant) {
            if let Some(agent) = &message.agent_type {
                *agent_usage.entry(agent.clone()).or_insert(0) += 1;
            }
        }

        MemoryStats {
            total_messages: self.messages.len(),
            user_messages: count(Role::User),
            assistant_messages: count(Role::Assistant),
            system_messages: count(Role::System),
            agent_usage,
            oldest_message: self.messages.front().map(|m| m.timestamp),
            newest_message: self.messages.back().map(|m| m.timestamp),
            max_messages: self.max_messages,
            streaming: self.streaming.is_some(),
        }
    }

    /// Open the streaming slot for `agent_type`
    ///
    /// Fails with [`AgentError::StreamAlreadyOpen`] while another stream is open.
    pub fn start_streaming(&mut self, agent_type: &str, metadata: Map<String, Value>) -> AgentResult<()> {
        if let Some(slot) = &self.streaming {
            return Err(AgentError::StreamAlreadyOpen(slot.agent_type.clone()));
        }

        self.streaming = Some(StreamingSlot {
            agent_type: agent_type.to_string(),
            metadata,
            buffer: String::new(),
            started_at: Utc::now(),
        });
        Ok(())
    }

    /// Append a fragment to the open streaming message; ignored when none is open
    pub fn append_streaming_chunk(&mut self, text: &str) {
        match &mut self.streaming {
            Some(slot) => slot.buffer.push_str(text),
            None => tracing::warn!("Dropping streaming chunk: no stream is open"),
        }
    }

    /// Close the slot and append its accumulated text as one assistant message
    pub fn finalize_streaming(&mut self) -> Option<ConversationMessage> {
        let slot = self.streaming.take()?;

        let duration_ms = (Utc::now() - slot.started_at).num_milliseconds().max(0);
        let mut metadata = slot.metadata;
        metadata.insert("was_streamed".to_string(), Value::Bool(true));
        metadata.insert("stream_duration_ms".to_string(), Value::from(duration_ms));

        let message = ConversationMessage::new(Role::Assistant, slot.buffer)
            .with_agent(slot.agent_type)
            .with_metadata(metadata);
        self.push(message.clone());
        Some(message)
    }

    /// Discard the open streaming message; a no-op when none is open
    pub fn cancel_streaming(&mut self) {
        if let Some(slot) = self.streaming.take() {
            tracing::debug!(
                "Cancelled {} agent stream after {} chars",
                slot.agent_type,
                slot.buffer.len()
            );
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.is_some()
    }

    /// Text accumulated so far, empty when no stream is open
    pub fn current_streaming_content(&self) -> &str {
        self.streaming.as_ref().map_or("", |slot| slot.buffer.as_str())
    }

    /// Write the full message list to the storage path
    ///
    /// Returns `false` when no storage path is configured.
    pub async fn save_to_disk(&self) -> AgentResult<bool> {
        let Some(path) = &self.storage_path else {
            return Ok(false);
        };

        let snapshot = HistorySnapshot {
            max_messages: self.max_messages,
            saved_at: Utc::now(),
            messages: self.messages.iter().cloned().collect(),
        };
        file::write_history(path, &snapshot).await?;

        tracing::info!("Saved {} messages to {}", self.messages.len(), path.display());
        Ok(true)
    }

    /// Replace the message list with the saved one
    ///
    /// Returns `false` when there is no saved history.
    pub async fn load_from_disk(&mut self) -> AgentResult<bool> {
        let Some(path) = self.storage_path.clone() else {
            return Ok(false);
        };

        let Some(snapshot) = file::read_history(&path).await? else {
            tracing::debug!("No saved history at {}", path.display());
            return Ok(false);
        };

        self.messages = snapshot.messages.into();
        self.trim();

        tracing::info!("Loaded {} messages from {}", self.messages.len(), path.display());
        Ok(true)
    }

    /// Remove the saved history file; returns whether one existed
    pub async fn delete_saved_history(&self) -> AgentResult<bool> {
        match &self.storage_path {
            Some(path) => file::delete_history(path).await,
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fifo_keeps_last_messages_in_order() {
        let mut memory = ConversationMemory::new(3);
        for i in 0..7 {
            memory.add_user(format!("msg {}", i));
        }

        let contents: Vec<&str> = memory.messages().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["msg 4", "msg 5", "msg 6"]);
    }

    #[test]
    fn test_set_max_messages_trims_oldest() {
        let mut memory = ConversationMemory::new(10);
        for i in 0..5 {
            memory.add_user(format!("{}", i));
        }
        memory.set_max_messages(2);

        assert_eq!(memory.len(), 2);
        assert_eq!(memory.messages().next().unwrap().content, "3");
    }

    #[test]
    fn test_finalize_concatenates_chunks() {
        let mut memory = ConversationMemory::new(10);
        memory.start_streaming("chat", Map::new()).unwrap();
        for chunk in ["a", "b", "c"] {
            memory.append_streaming_chunk(chunk);
        }

        let message = memory.finalize_streaming().unwrap();
        assert_eq!(message.content, "abc");
        assert_eq!(message.agent_type.as_deref(), Some("chat"));
        assert_eq!(message.metadata["was_streamed"], Value::Bool(true));
        assert_eq!(memory.len(), 1);
        assert!(!memory.is_streaming());
    }

    #[test]
    fn test_cancel_discards_chunks_and_is_idempotent() {
        let mut memory = ConversationMemory::new(10);
        memory.start_streaming("chat", Map::new()).unwrap();
        for chunk in ["a", "b", "c"] {
            memory.append_streaming_chunk(chunk);
        }

        memory.cancel_streaming();
        memory.cancel_streaming();

        assert!(memory.is_empty());
        assert_eq!(memory.current_streaming_content(), "");
        assert!(memory.finalize_streaming().is_none());
    }

    #[test]
    fn test_start_streaming_rejects_reentry() {
        let mut memory = ConversationMemory::new(10);
        memory.start_streaming("grading", Map::new()).unwrap();

        let err = memory.start_streaming("formatting", Map::new()).unwrap_err();
        assert!(matches!(err, AgentError::StreamAlreadyOpen(agent) if agent == "grading"));
    }

    #[test]
    fn test_chunk_without_stream_is_ignored() {
        let mut memory = ConversationMemory::new(10);
        memory.append_streaming_chunk("lost");
        assert!(memory.is_empty());
        assert_eq!(memory.current_streaming_content(), "");
    }

    #[test]
    fn test_completion_messages_filter_system() {
        let mut memory = ConversationMemory::new(10);
        memory.add_system("rules");
        memory.add_user("hi");
        memory.add_assistant("hello", Some("chat"), Map::new());

        let without = memory.get_for_completion(false);
        assert_eq!(without.len(), 2);
        assert_eq!(without[1].content, "[chat agent]: hello");
        assert_eq!(memory.get_for_completion(true).len(), 3);
    }

    #[test]
    fn test_recent_context_string() {
        let mut memory = ConversationMemory::new(10);
        assert_eq!(memory.recent_context_string(5), "No previous conversation context.");

        memory.add_user("first");
        memory.add_user("second");
        memory.add_assistant("answer", Some("analysis"), Map::new());

        let context = memory.recent_context_string(2);
        let lines: Vec<&str> = context.lines().collect();
        assert_eq!(lines[0], "Recent conversation context:");
        assert_eq!(lines.len(), 3);
        assert!(lines[1].ends_with("User: second"));
        assert!(lines[2].ends_with("Assistant (analysis): answer"));
    }

    #[test]
    fn test_stats_counts_roles_and_agents() {
        let mut memory = ConversationMemory::new(10);
        memory.add_user("q1");
        memory.add_assistant("a1", Some("chat"), Map::new());
        memory.add_user("q2");
        memory.add_assistant("a2", Some("chat"), Map::new());
        memory.add_assistant("oops", Some("error"), Map::new());

        let stats = memory.stats();
        assert_eq!(stats.total_messages, 5);
        assert_eq!(stats.user_messages, 2);
        assert_eq!(stats.assistant_messages, 3);
        assert_eq!(stats.agent_usage.get("chat"), Some(&2));
        assert_eq!(stats.agent_usage.get("error"), Some(&1));
        assert!(stats.oldest_message <= stats.newest_message);
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history").join("session.json");

        let mut memory = ConversationMemory::new(10).with_storage(&path);
        memory.add_user("remember me");
        let mut metadata = Map::new();
        metadata.insert("workflow".into(), Value::from("standard"));
        memory.add_assistant("I will", Some("chat"), metadata);
        assert!(memory.save_to_disk().await.unwrap());

        let mut restored = ConversationMemory::new(10).with_storage(&path);
        assert!(restored.load_from_disk().await.unwrap());
        let messages: Vec<&ConversationMessage> = restored.messages().collect();
        let original: Vec<&ConversationMessage> = memory.messages().collect();
        assert_eq!(messages, original);
    }

    #[tokio::test]
    async fn test_load_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let mut memory = ConversationMemory::new(10).with_storage(dir.path().join("absent.json"));
        memory.add_user("kept");

        assert!(!memory.load_from_disk().await.unwrap());
        assert_eq!(memory.len(), 1);
    }

    #[tokio::test]
    async fn test_load_trims_to_current_bound() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("h.json");

        let mut memory = ConversationMemory::new(10).with_storage(&path);
        for i in 0..6 {
            memory.add_user(format!("{}", i));
        }
        memory.save_to_disk().await.unwrap();

        let mut small = ConversationMemory::new(4).with_storage(&path);
        small.load_from_disk().await.unwrap();
        assert_eq!(small.len(), 4);
        assert_eq!(small.messages().next().unwrap().content, "2");
    }

    #[tokio::test]
    async fn test_delete_saved_history() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("h.json");
        let mut memory = ConversationMemory::new(10).with_storage(&path);
        memory.add_user("x");
        memory.save_to_disk().await.unwrap();

        assert!(memory.delete_saved_history().await.unwrap());
        assert!(!path.exists());
        assert!(!memory.delete_saved_history().await.unwrap());
    }

    #[tokio::test]
    async fn test_save_without_storage_path() {
        let memory = ConversationMemory::new(10);
        assert!(!memory.save_to_disk().await.unwrap());
    }
}
