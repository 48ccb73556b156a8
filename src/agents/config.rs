//! Configuration types for LLM providers and the specialized agents

use serde::{Deserialize, Serialize};

use super::domain::AgentKind;

/// LLM provider configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmProviderConfig {
    /// Provider type
    #[serde(default)]
    pub provider: LlmProviderType,
    /// Model name, or deployment name for Azure
    #[serde(default = "default_model")]
    pub model: String,
    /// Environment variable containing the API key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Custom base URL (required for Azure, optional for OpenAI-compatible proxies)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Azure `api-version` query parameter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    /// Default temperature for completions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Default max tokens for completions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for LlmProviderConfig {
    fn default() -> Self {
        Self {
            provider: LlmProviderType::default(),
            model: default_model(),
            api_key_env: None,
            base_url: None,
            api_version: None,
            temperature: None,
            max_tokens: None,
        }
    }
}

/// Supported LLM providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderType {
    /// OpenAI or any OpenAI-compatible endpoint
    #[default]
    OpenAI,
    /// Azure OpenAI
    #[serde(alias = "azure")]
    AzureOpenAI,
}

impl std::fmt::Display for LlmProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProviderType::OpenAI => write!(f, "openai"),
            LlmProviderType::AzureOpenAI => write!(f, "azure"),
        }
    }
}

/// Prompt and sampling settings for one specialized agent
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentProfile {
    pub kind: AgentKind,
    /// System prompt; may use Tera variables (`{{ agent }}`)
    pub system_prompt: String,
    /// Tera template for the user message; `{{ input }}` is the request text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sends prior conversation turns along with the request
    #[serde(default)]
    pub history_aware: bool,
    /// Streams tokens from the provider instead of returning one block
    #[serde(default = "default_streaming")]
    pub streaming: bool,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub specialization: String,
}

fn default_streaming() -> bool {
    true
}

/// Partial profile loaded from `[agents.<kind>]` or `config/agents/*`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AgentOverrides {
    /// Required when loaded from a standalone file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<AgentKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_aware: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming: Option<bool>,
}

impl AgentProfile {
    /// Built-in profile for an agent kind
    ///
    /// `temperature` is the global agent temperature; code review always runs cooler.
    pub fn default_for(kind: AgentKind, temperature: f32) -> Self {
        let (system_prompt, capabilities, specialization): (&str, &[&str], &str) = match kind {
            AgentKind::Chat => (
                "You are a helpful conversational assistant. Answer clearly and concisely, \
                 ask for clarification when a request is ambiguous, and keep a friendly tone.",
                &[
                    "General conversation",
                    "Question answering",
                    "Explanations and clarifications",
                    "Creative writing assistance",
                    "General problem solving",
                ],
                "Conversational AI and general assistance",
            ),
            AgentKind::Analysis => (
                "You are a data analysis specialist. Interpret data, perform calculations, \
                 describe statistical reasoning step by step and recommend visualizations.",
                &[
                    "Data analysis and interpretation",
                    "Statistical analysis",
                    "Code generation for data processing",
                    "Mathematical computations",
                    "Pattern recognition",
                ],
                "Data analysis and computational tasks",
            ),
            AgentKind::Grading => (
                "You are an educational assessment specialist acting as the grading agent. \
                 Grade the submission against its rubric, give a score per section with \
                 a total, and explain each deduction.",
                &[
                    "Assignment and essay grading",
                    "Detailed feedback generation",
                    "Rubric creation and application",
                    "Learning outcome analysis",
                    "Conversation history awareness for consistent grading",
                ],
                "Educational assessment and grading with context awareness",
            ),
            AgentKind::Formatting => (
                "You are a formatting agent. Convert raw assessment results into a clean \
                 markdown report: a summary with total score and percentage, a table of \
                 section scores and a list of rubric items. Preserve every number.",
                &[
                    "Markdown report generation",
                    "Score tables and summaries",
                    "Rubric item listings",
                ],
                "Presentation of grading results",
            ),
            AgentKind::CodeReview => (
                "You are a code review specialist. Identify bugs, security vulnerabilities \
                 and performance problems, prioritize them by severity and suggest fixes \
                 with short code examples.",
                &[
                    "Bug detection and logic error identification",
                    "Security vulnerability analysis",
                    "Performance optimization suggestions",
                    "Best practices enforcement",
                    "Conversation history for consistent reviews",
                ],
                "Code review and quality analysis with context awareness",
            ),
        };

        let prompt_template = match kind {
            AgentKind::Formatting => Some(
                "Format as professional grading report:\n\n{{ input }}\n\n\
                 Include a grade summary, section scores and rubric items."
                    .to_string(),
            ),
            _ => None,
        };

        Self {
            kind,
            system_prompt: system_prompt.to_string(),
            prompt_template,
            temperature: Some(match kind {
                AgentKind::CodeReview => 0.3,
                _ => temperature,
            }),
            max_tokens: None,
            history_aware: matches!(kind, AgentKind::Chat | AgentKind::Grading | AgentKind::CodeReview),
            streaming: true,
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            specialization: specialization.to_string(),
        }
    }

    /// Apply the set fields of `overrides` on top of this profile
    pub fn apply(&mut self, overrides: &AgentOverrides) {
        if let Some(prompt) = &overrides.system_prompt {
            self.system_prompt = prompt.clone();
        }
        if let Some(template) = &overrides.prompt_template {
            self.prompt_template = Some(template.clone());
        }
        if overrides.temperature.is_some() {
            self.temperature = overrides.temperature;
        }
        if overrides.max_tokens.is_some() {
            self.max_tokens = overrides.max_tokens;
        }
        if let Some(history_aware) = overrides.history_aware {
            self.history_aware = history_aware;
        }
        if let Some(streaming) = overrides.streaming {
            self.streaming = streaming;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profiles() {
        let review = AgentProfile::default_for(AgentKind::CodeReview, 1.0);
        assert_eq!(review.temperature, Some(0.3));
        assert!(review.history_aware);

        let formatting = AgentProfile::default_for(AgentKind::Formatting, 0.7);
        assert_eq!(formatting.temperature, Some(0.7));
        assert!(!formatting.history_aware);
        assert!(formatting.prompt_template.unwrap().contains("{{ input }}"));
    }

    #[test]
    fn test_overrides_only_touch_set_fields() {
        let mut profile = AgentProfile::default_for(AgentKind::Chat, 1.0);
        let original_prompt = profile.system_prompt.clone();

        profile.apply(&AgentOverrides {
            temperature: Some(0.1),
            streaming: Some(false),
            ..Default::default()
        });

        assert_eq!(profile.temperature, Some(0.1));
        assert!(!profile.streaming);
        assert_eq!(profile.system_prompt, original_prompt);
    }

    #[test]
    fn test_provider_type_accepts_alias() {
        let config: LlmProviderConfig = toml::from_str("provider = \"azure\"\nmodel = \"dep\"").unwrap();
        assert_eq!(config.provider, LlmProviderType::AzureOpenAI);
        assert_eq!(config.provider.to_string(), "azure");
    }
}
