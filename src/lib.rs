//! # Maestro - Multi-Agent LLM Orchestration
//!
//! Maestro routes each user request to one of several specialized LLM agents
//! and returns a single synthesized reply, either all at once or as a stream
//! of events.
//!
//! ## Features
//!
//! - **Classification & Routing**: a classifier picks chat, analysis, grading or code review
//! - **Grading Pipeline**: grading, then formatting, then optional explanatory notes
//! - **Conversation Memory**: bounded history with streaming accumulation and JSON persistence
//! - **Guards**: input validation and per-session sliding-window rate limiting
//! - **Caching**: TTL + LRU response cache
//! - **Metrics**: per-agent Prometheus counters and histograms
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use maestro::agents::Orchestrator;
//! use maestro::config::Settings;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::new()?;
//!     let orchestrator = Orchestrator::from_settings(&settings).await?;
//!
//!     let reply = orchestrator.chat("Grade this essay: ...", "default").await?;
//!     println!("{}", reply);
//!
//!     orchestrator.shutdown().await
//! }
//! ```
//!
//! ## Architecture
//!
//! - **Agents**: domain types, LLM providers, agents, memory and orchestration
//! - **Adapters**: validation, rate limiting, caching and metrics around the workflow
//! - **Config**: configuration loading and validation

pub mod adapters;
pub mod agents;
pub mod cli;
pub mod config;
