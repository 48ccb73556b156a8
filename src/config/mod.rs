use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub mod validator;

use crate::agents::config::{AgentOverrides, LlmProviderConfig};
use crate::agents::domain::AgentKind;
use crate::cli::Cli;

/// Top-level configuration
///
/// Sources, lowest precedence first: built-in defaults, the TOML file,
/// `MAESTRO_`-prefixed environment variables (`__` separates nested keys),
/// then per-agent files under `config/agents/` next to the TOML file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub llm: LlmProviderConfig,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub memory: MemorySettings,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub data: DataSettings,
    /// Per-agent prompt and sampling overrides, keyed by agent kind
    #[serde(default)]
    pub agents: BTreeMap<AgentKind, AgentOverrides>,
}

/// Settings shared by every agent call
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentSettings {
    /// Sampling temperature for agents without their own override
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Upper bound on each model call, or on the wait for each streamed chunk
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_temperature() -> f32 {
    1.0
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MemorySettings {
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    #[serde(default = "default_true")]
    pub persist_history: bool,
    #[serde(default = "default_history_file")]
    pub history_file: PathBuf,
}

fn default_max_messages() -> usize {
    20
}

fn default_history_file() -> PathBuf {
    PathBuf::from("data/conversation_history.json")
}

fn default_true() -> bool {
    true
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            persist_history: true,
            history_file: default_history_file(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Calls admitted per identifier within one window
    #[serde(default = "default_max_calls")]
    pub max_calls: usize,
    #[serde(default = "default_period")]
    pub period_seconds: u64,
}

fn default_max_calls() -> usize {
    10
}

fn default_period() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_calls: default_max_calls(),
            period_seconds: default_period(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ValidationConfig {
    /// Maximum input length in characters
    #[serde(default = "default_max_input_length")]
    pub max_input_length: usize,
}

fn default_max_input_length() -> usize {
    10_000
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_input_length: default_max_input_length(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
    #[serde(default = "default_cache_size")]
    pub max_size: usize,
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_cache_size() -> usize {
    100
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: default_cache_ttl(),
            max_size: default_cache_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Where `shutdown` writes the final metrics snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_path: Option<PathBuf>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            export_path: None,
        }
    }
}

/// Interaction log used for relevance context
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DataSettings {
    /// Append interactions to `interactions_file` instead of keeping them in memory
    #[serde(default = "default_true")]
    pub persist: bool,
    #[serde(default = "default_interactions_file")]
    pub interactions_file: PathBuf,
    /// How many relevant prior interactions to retrieve per request
    #[serde(default = "default_max_context")]
    pub max_context: usize,
}

fn default_interactions_file() -> PathBuf {
    PathBuf::from("data/interactions.jsonl")
}

fn default_max_context() -> usize {
    5
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            persist: true,
            interactions_file: default_interactions_file(),
            max_context: default_max_context(),
        }
    }
}

impl Settings {
    /// Load from `maestro.toml` in the working directory
    pub fn new() -> Result<Self, anyhow::Error> {
        Self::load(Path::new("maestro.toml"))
    }

    /// Create settings from CLI arguments (config file, env vars, then CLI overrides)
    pub fn new_with_cli(cli: &Cli) -> Result<Self, anyhow::Error> {
        let mut settings = Self::build(&cli.config)?;

        if let Some(history_file) = &cli.history_file {
            settings.memory.history_file = history_file.clone();
            settings.memory.persist_history = true;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Load and validate settings from a TOML file (missing file means defaults)
    pub fn load(config_path: &Path) -> Result<Self, anyhow::Error> {
        let settings = Self::build(config_path)?;
        settings.validate()?;
        Ok(settings)
    }

    fn build(config_path: &Path) -> Result<Self, anyhow::Error> {
        let s = Config::builder()
            .set_default("llm.provider", "openai")?
            .add_source(File::from(config_path.to_path_buf()).required(false))
            .add_source(
                Environment::with_prefix("MAESTRO")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings: Settings = s.try_deserialize()?;

        let root = config_path.parent().unwrap_or_else(|| Path::new(""));
        settings.load_agents_from_dir(&root.join("config").join("agents"))?;

        Ok(settings)
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        validator::ConfigValidator::validate(self).map_err(|errors| {
            let error_messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            anyhow::anyhow!(
                "Configuration validation failed:\n{}",
                error_messages.join("\n")
            )
        })
    }

    /// Merge agent override files (`.toml`, `.yaml`, `.yml`, `.json`) into `agents`
    fn load_agents_from_dir(&mut self, path: &Path) -> Result<(), anyhow::Error> {
        let pattern = format!("{}/*", path.display());
        for entry in glob::glob(&pattern)? {
            match entry {
                Ok(path) => {
                    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                        continue;
                    };
                    if !matches!(ext, "json" | "yaml" | "yml" | "toml") {
                        continue;
                    }

                    let content = std::fs::read_to_string(&path)?;
                    let overrides: AgentOverrides = match ext {
                        "json" => serde_json::from_str(&content)?,
                        "toml" => toml::from_str(&content)?,
                        _ => serde_yaml::from_str(&content)?,
                    };

                    match overrides.kind {
                        Some(kind) => {
                            tracing::info!("Loaded {} agent overrides from {}", kind, path.display());
                            self.agents.insert(kind, overrides);
                        }
                        None => tracing::warn!(
                            "Ignoring agent override file without `kind`: {}",
                            path.display()
                        ),
                    }
                }
                Err(e) => tracing::warn!("Failed to read glob entry: {}", e),
            }
        }
        Ok(())
    }
}
