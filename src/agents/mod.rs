//! Multi-agent orchestration engine
//!
//! ## Architecture
//!
//! - `domain/` - Core types (AgentKind, ConversationMessage, StreamEvent)
//! - `llm/` - LLM provider implementations with streaming
//! - `core/` - The `Agent` trait, prompt-driven agents and the registry
//! - `memory/` - Conversation memory and the interaction log
//! - `orchestration/` - Classification, routing and the grading pipeline

pub mod config;
pub mod domain;
pub mod error;
pub mod llm;
pub mod memory;
pub mod core;
pub mod orchestration;

// Re-export commonly used types
pub use config::*;
pub use domain::*;
pub use error::*;
pub use orchestration::{ChatTrace, Orchestrator, OrchestratorBuilder};
