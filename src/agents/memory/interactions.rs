//! Completed-interaction records and best-effort keyword relevance search

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::agents::domain::AgentKind;
use crate::agents::error::AgentResult;

/// How many of the newest interactions relevance search looks at
pub const RELEVANCE_WINDOW: usize = 50;

/// One finished request, as stored by the data-management step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub id: String,
    pub user_input: String,
    pub classification: AgentKind,
    /// Response text per agent that took part
    pub agent_responses: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl Interaction {
    pub fn new(
        user_input: impl Into<String>,
        classification: AgentKind,
        agent_responses: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_input: user_input.into(),
            classification,
            agent_responses,
            timestamp: Utc::now(),
        }
    }

    /// Lowercased text that keyword search matches against
    fn searchable_text(&self) -> String {
        let mut text = self.user_input.to_lowercase();
        for response in self.agent_responses.values() {
            text.push(' ');
            text.push_str(&response.to_lowercase());
        }
        text
    }
}

/// Prior interactions related to the current request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataContext {
    pub relevant_interactions: Vec<Interaction>,
    pub context_count: usize,
    pub search_keywords: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractionStats {
    pub total_interactions: usize,
    pub classifications: BTreeMap<String, usize>,
}

/// Persistence collaborator for completed interactions
#[async_trait]
pub trait InteractionStore: Send + Sync {
    async fn store(&self, interaction: &Interaction) -> AgentResult<()>;

    /// The newest `limit` interactions, oldest first
    async fn recent(&self, limit: usize) -> AgentResult<Vec<Interaction>>;

    async fn count(&self) -> AgentResult<usize>;

    /// Up to `max_results` stored interactions sharing keywords with `query`
    async fn relevant(&self, query: &str, max_results: usize) -> AgentResult<DataContext> {
        let candidates = self.recent(RELEVANCE_WINDOW).await?;
        Ok(rank_relevant(query, candidates, max_results))
    }

    async fn stats(&self) -> AgentResult<InteractionStats> {
        let all = self.recent(usize::MAX).await?;
        let mut classifications = BTreeMap::new();
        for interaction in &all {
            *classifications
                .entry(interaction.classification.to_string())
                .or_insert(0) += 1;
        }
        Ok(InteractionStats {
            total_interactions: all.len(),
            classifications,
        })
    }
}

/// Score each candidate by how many query keywords its text contains
///
/// Candidates arrive oldest first; they are ranked newest first and stably
/// sorted by score, so equal scores keep the more recent interaction ahead.
pub fn rank_relevant(query: &str, candidates: Vec<Interaction>, max_results: usize) -> DataContext {
    let mut keywords: Vec<String> = Vec::new();
    for word in query.to_lowercase().split_whitespace() {
        if !keywords.iter().any(|k| k == word) {
            keywords.push(word.to_string());
        }
    }

    let mut scored: Vec<(usize, Interaction)> = candidates
        .into_iter()
        .rev()
        .filter_map(|interaction| {
            let text = interaction.searchable_text();
            let score = keywords.iter().filter(|k| text.contains(k.as_str())).count();
            (score > 0).then_some((score, interaction))
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));

    let relevant_interactions: Vec<Interaction> = scored
        .into_iter()
        .take(max_results)
        .map(|(_, interaction)| interaction)
        .collect();

    DataContext {
        context_count: relevant_interactions.len(),
        relevant_interactions,
        search_keywords: keywords,
    }
}
