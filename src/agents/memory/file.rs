//! File-based persistence: conversation history snapshots and the interaction log

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{Interaction, InteractionStore};
use crate::agents::domain::ConversationMessage;
use crate::agents::error::{AgentError, AgentResult};

/// On-disk layout of a saved conversation
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct HistorySnapshot {
    pub max_messages: usize,
    pub saved_at: DateTime<Utc>,
    pub messages: Vec<ConversationMessage>,
}

async fn ensure_parent(path: &Path) -> AgentResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await.map_err(|e| {
            AgentError::Memory(format!("Failed to create directory {}: {}", parent.display(), e))
        })?;
    }
    Ok(())
}

/// Write via a sibling temp file and rename so readers never see a partial file
pub(crate) async fn write_history(path: &Path, snapshot: &HistorySnapshot) -> AgentResult<()> {
    ensure_parent(path).await?;

    let content = serde_json::to_string_pretty(snapshot)?;
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    fs::write(&temp_path, content).await.map_err(|e| {
        AgentError::Memory(format!("Failed to write history file: {}", e))
    })?;
    fs::rename(&temp_path, path).await.map_err(|e| {
        AgentError::Memory(format!("Failed to replace history file: {}", e))
    })?;

    Ok(())
}

pub(crate) async fn read_history(path: &Path) -> AgentResult<Option<HistorySnapshot>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path).await.map_err(|e| {
        AgentError::Memory(format!("Failed to read history file: {}", e))
    })?;

    let snapshot: HistorySnapshot = serde_json::from_str(&content)?;
    Ok(Some(snapshot))
}

pub(crate) async fn delete_history(path: &Path) -> AgentResult<bool> {
    if !path.exists() {
        return Ok(false);
    }

    fs::remove_file(path).await.map_err(|e| {
        AgentError::Memory(format!("Failed to delete history file: {}", e))
    })?;
    Ok(true)
}

/// Append-only JSON Lines interaction log
pub struct FileInteractionStore {
    path: PathBuf,
}

impl FileInteractionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> AgentResult<Vec<Interaction>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path).await.map_err(|e| {
            AgentError::Memory(format!("Failed to read interactions file: {}", e))
        })?;

        let mut interactions = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Interaction>(line) {
                Ok(interaction) => interactions.push(interaction),
                Err(e) => tracing::warn!(
                    "Skipping malformed interaction at {}:{}: {}",
                    self.path.display(),
                    line_no + 1,
                    e
                ),
            }
        }
        Ok(interactions)
    }
}

#[async_trait]
impl InteractionStore for FileInteractionStore {
    async fn store(&self, interaction: &Interaction) -> AgentResult<()> {
        ensure_parent(&self.path).await?;

        let mut line = serde_json::to_string(interaction)?;
        line.push('\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| AgentError::Memory(format!("Failed to open interactions file: {}", e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| AgentError::Memory(format!("Failed to append interaction: {}", e)))?;
        file.flush().await?;

        Ok(())
    }

    async fn recent(&self, limit: usize) -> AgentResult<Vec<Interaction>> {
        let mut all = self.read_all().await?;
        let start = all.len().saturating_sub(limit);
        Ok(all.split_off(start))
    }

    async fn count(&self) -> AgentResult<usize> {
        Ok(self.read_all().await?.len())
    }
}
