//! Agent domain types

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The specialized agents known to the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// General conversation
    Chat,
    /// Data and text analysis
    Analysis,
    /// Educational assessment
    Grading,
    /// Turns raw grading output into a presentable report
    Formatting,
    /// Source code review
    CodeReview,
}

impl AgentKind {
    /// Every agent kind, in registry order
    pub const ALL: [AgentKind; 5] = [
        AgentKind::Chat,
        AgentKind::Analysis,
        AgentKind::Grading,
        AgentKind::Formatting,
        AgentKind::CodeReview,
    ];

    /// Labels the classifier is allowed to return
    pub const CLASSIFIABLE: [AgentKind; 4] = [
        AgentKind::Chat,
        AgentKind::Analysis,
        AgentKind::Grading,
        AgentKind::CodeReview,
    ];

    /// Stable snake_case name, also used as the metrics label
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Chat => "chat",
            AgentKind::Analysis => "analysis",
            AgentKind::Grading => "grading",
            AgentKind::Formatting => "formatting",
            AgentKind::CodeReview => "code_review",
        }
    }

    /// Parse a classifier label, accepting loose spellings like `"Code Review."`
    ///
    /// Returns `None` for anything outside the classifiable label set.
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized: String = label
            .trim()
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();

        Self::CLASSIFIABLE
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown agent kind '{}'", s))
    }
}

/// Self-description returned by `Agent::describe_capabilities`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCapabilities {
    pub agent_type: AgentKind,
    pub capabilities: Vec<String>,
    pub specialization: String,
}

/// Health reported by `Agent::status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum AgentHealth {
    Active,
    Error(String),
}

impl AgentHealth {
    pub fn is_active(&self) -> bool {
        matches!(self, AgentHealth::Active)
    }
}

impl std::fmt::Display for AgentHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentHealth::Active => write!(f, "active"),
            AgentHealth::Error(detail) => write!(f, "error: {}", detail),
        }
    }
}
