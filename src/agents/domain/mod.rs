//! Domain types for the orchestration engine
//!
//! Core abstractions shared by agents, memory and the orchestrator.

mod agent;
mod event;
mod message;

pub use agent::*;
pub use event::*;
pub use message::*;
