//! Error types for the orchestration engine

use thiserror::Error;

use crate::adapters::input_validator::ValidationErrorKind;

/// Errors that can occur during agent and orchestration operations
#[derive(Debug, Error)]
pub enum AgentError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// LLM provider error
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Memory/persistence error
    #[error("Memory error: {0}")]
    Memory(String),

    /// A streaming message is already being accumulated
    #[error("A streaming message for agent '{0}' is already in progress")]
    StreamAlreadyOpen(String),

    /// Consumer stopped reading
    #[error("Operation was cancelled")]
    Cancelled,

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors specific to LLM provider operations
#[derive(Debug, Error)]
pub enum LlmError {
    /// API error
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Rate limited by the provider
    #[error("Rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Authentication error
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Network error
    #[error("Network error: {0}")]
    Network(String),

    /// Streaming error
    #[error("Streaming error: {0}")]
    Streaming(String),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Content filtered
    #[error("Content filtered by safety system")]
    ContentFiltered,

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Timeout
    #[error("Request timed out")]
    Timeout,
}

/// Rejections surfaced to callers of `chat` and `chat_streaming`
///
/// Everything else is converted into an apology response instead of an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// Input failed validation before any model call
    #[error("Invalid input: {kind}")]
    InputValidation { kind: ValidationErrorKind },

    /// Caller exceeded the sliding-window rate limit
    #[error("Rate limit exceeded. Please try again in {retry_after_secs} seconds.")]
    RateLimited { retry_after_secs: u64 },
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else if err.is_connect() {
            LlmError::Network(format!("Connection error: {}", err))
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::Memory(format!("IO error: {}", err))
    }
}

/// Result type alias for agent operations
pub type AgentResult<T> = Result<T, AgentError>;

/// Result type alias for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_message() {
        let err = ChatError::RateLimited { retry_after_secs: 12 };
        assert_eq!(
            err.to_string(),
            "Rate limit exceeded. Please try again in 12 seconds."
        );
    }

    #[test]
    fn test_llm_error_wraps_into_agent_error() {
        let err: AgentError = LlmError::Timeout.into();
        assert!(matches!(err, AgentError::Llm(LlmError::Timeout)));
        assert_eq!(err.to_string(), "LLM error: Request timed out");
    }
}
