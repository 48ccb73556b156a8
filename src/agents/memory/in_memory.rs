//! In-memory interaction store

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{Interaction, InteractionStore};
use crate::agents::error::AgentResult;

/// Interaction store that lives only as long as the process
#[derive(Default)]
pub struct InMemoryInteractionStore {
    interactions: Arc<RwLock<Vec<Interaction>>>,
    max_interactions: Option<usize>,
}

impl InMemoryInteractionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `max` interactions, dropping the oldest
    pub fn with_capacity_limit(max: usize) -> Self {
        Self {
            interactions: Arc::new(RwLock::new(Vec::new())),
            max_interactions: Some(max),
        }
    }
}

#[async_trait]
impl InteractionStore for InMemoryInteractionStore {
    async fn store(&self, interaction: &Interaction) -> AgentResult<()> {
        let mut interactions = self.interactions.write().await;
        interactions.push(interaction.clone());

        // Trim if exceeds max interactions
        if let Some(max) = self.max_interactions {
            if interactions.len() > max {
                let remove_count = interactions.len() - max;
                interactions.drain(0..remove_count);
            }
        }

        Ok(())
    }

    async fn recent(&self, limit: usize) -> AgentResult<Vec<Interaction>> {
        let interactions = self.interactions.read().await;
        let start = interactions.len().saturating_sub(limit);
        Ok(interactions[start..].to_vec())
    }

    async fn count(&self) -> AgentResult<usize> {
        Ok(self.interactions.read().await.len())
    }
}
