use thiserror::Error;

use crate::agents::config::{AgentOverrides, LlmProviderConfig, LlmProviderType};
use crate::agents::domain::AgentKind;
use crate::config::Settings;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.into(),
        reason: reason.into(),
    }
}

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(settings: &Settings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        Self::validate_llm(&settings.llm, &mut errors);
        Self::validate_limits(settings, &mut errors);

        for (kind, overrides) in &settings.agents {
            Self::validate_agent(*kind, overrides, &mut errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_llm(llm: &LlmProviderConfig, errors: &mut Vec<ValidationError>) {
        if llm.model.trim().is_empty() {
            errors.push(ValidationError::MissingField("llm.model".to_string()));
        }

        if llm.provider == LlmProviderType::AzureOpenAI && llm.base_url.is_none() {
            errors.push(ValidationError::MissingField(
                "llm.base_url (required for azure)".to_string(),
            ));
        }

        if let Some(t) = llm.temperature {
            Self::check_temperature("llm.temperature", t, errors);
        }

        if llm.max_tokens == Some(0) {
            errors.push(invalid("llm.max_tokens", "Must be greater than 0"));
        }
    }

    fn validate_limits(settings: &Settings, errors: &mut Vec<ValidationError>) {
        Self::check_temperature("agent.temperature", settings.agent.temperature, errors);

        if settings.agent.request_timeout_seconds == 0 {
            errors.push(invalid("agent.request_timeout_seconds", "Must be at least 1"));
        }

        if settings.memory.max_messages == 0 {
            errors.push(invalid("memory.max_messages", "Must be at least 1"));
        }

        if settings.rate_limit.enabled {
            if settings.rate_limit.max_calls == 0 {
                errors.push(invalid("rate_limit.max_calls", "Must be at least 1"));
            }
            if settings.rate_limit.period_seconds == 0 {
                errors.push(invalid("rate_limit.period_seconds", "Must be at least 1"));
            }
        }

        if settings.validation.max_input_length == 0 {
            errors.push(invalid("validation.max_input_length", "Must be at least 1"));
        }

        if settings.cache.enabled {
            if settings.cache.max_size == 0 {
                errors.push(invalid("cache.max_size", "Must be at least 1"));
            }
            if settings.cache.ttl_seconds == 0 {
                errors.push(invalid("cache.ttl_seconds", "Must be at least 1"));
            }
        }
    }

    fn validate_agent(kind: AgentKind, overrides: &AgentOverrides, errors: &mut Vec<ValidationError>) {
        if let Some(declared) = overrides.kind {
            if declared != kind {
                errors.push(invalid(
                    format!("agents.{}.kind", kind),
                    format!("Declares '{}' under the '{}' table", declared, kind),
                ));
            }
        }

        if let Some(prompt) = &overrides.system_prompt {
            if prompt.trim().is_empty() {
                errors.push(invalid(format!("agents.{}.system_prompt", kind), "Must not be empty"));
            }
        }

        if let Some(t) = overrides.temperature {
            Self::check_temperature(&format!("agents.{}.temperature", kind), t, errors);
        }
    }

    fn check_temperature(field: &str, value: f32, errors: &mut Vec<ValidationError>) {
        if !(0.0..=2.0).contains(&value) {
            errors.push(invalid(field, format!("{} is outside 0.0..=2.0", value)));
        }
    }
}
