//! Request text checks applied before any model call

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Opening `<script` tag, `javascript:` URI, or inline `on<event>=` handler
static UNSAFE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)<script\b[^>]*>",
        r"(?i)javascript\s*:",
        r"(?i)\bon[a-z]+\s*=",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("Invalid unsafe-content regex"))
    .collect()
});

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("Invalid whitespace regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationErrorKind {
    EmptyInput,
    TooLong { max: usize },
    SuspiciousContent,
}

impl std::fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyInput => write!(f, "input is empty"),
            Self::TooLong { max } => write!(f, "input exceeds {} characters", max),
            Self::SuspiciousContent => write!(f, "input contains potentially unsafe content"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub error: Option<ValidationErrorKind>,
}

impl ValidationOutcome {
    fn ok() -> Self {
        Self { valid: true, error: None }
    }

    fn rejected(kind: ValidationErrorKind) -> Self {
        Self {
            valid: false,
            error: Some(kind),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InputValidator {
    max_input_length: usize,
}

impl InputValidator {
    pub fn new(max_input_length: usize) -> Self {
        Self { max_input_length }
    }

    pub fn max_input_length(&self) -> usize {
        self.max_input_length
    }

    /// Length is counted in characters, not bytes
    pub fn validate(&self, text: &str) -> ValidationOutcome {
        if text.trim().is_empty() {
            return ValidationOutcome::rejected(ValidationErrorKind::EmptyInput);
        }

        if text.chars().count() > self.max_input_length {
            return ValidationOutcome::rejected(ValidationErrorKind::TooLong {
                max: self.max_input_length,
            });
        }

        if UNSAFE_PATTERNS.iter().any(|re| re.is_match(text)) {
            return ValidationOutcome::rejected(ValidationErrorKind::SuspiciousContent);
        }

        ValidationOutcome::ok()
    }

    /// Strip NUL bytes, collapse whitespace runs, trim
    pub fn sanitize(&self, text: &str) -> String {
        let without_nul = text.replace('\0', "");
        WHITESPACE.replace_all(without_nul.trim(), " ").into_owned()
    }
}

impl Default for InputValidator {
    fn default() -> Self {
        Self::new(crate::config::ValidationConfig::default().max_input_length)
    }
}
