//! Configuration loading and validation for aula.
//!
//! Loads configuration from a TOML file with environment variable overrides,
//! and validates all settings at startup. The resulting `PipelineConfig` is
//! immutable and injected into the gateway and orchestrator at construction
//! time — no ambient global state.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// The root configuration structure.
///
/// Maps directly to `aula.toml`.
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct PipelineConfig {
    /// Ordered provider fallback chain. Index 0 is tried first.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// Session guard quotas
    #[serde(default)]
    pub guard: GuardConfig,

    /// Response cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Context pruning settings
    #[serde(default)]
    pub context: ContextConfig,

    /// Knowledge retrieval settings
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Model invocation limits
    #[serde(default)]
    pub model: ModelConfig,

    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Persistence backend settings
    #[serde(default)]
    pub store: StoreConfig,
}

/// One entry in the provider fallback chain.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Identifier used in logs and response metadata.
    pub name: String,

    /// Adapter kind: "anthropic" or "openai".
    pub kind: String,

    /// API key (usually supplied via env override).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL override (proxies, test servers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Model to request from this provider.
    pub model: String,

    /// Per-provider first-token timeout in seconds.
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider_timeout_secs() -> u64 {
    30
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl std::fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("providers", &self.providers)
            .field("guard", &self.guard)
            .field("cache", &self.cache)
            .field("context", &self.context)
            .field("retrieval", &self.retrieval)
            .field("model", &self.model)
            .field("server", &self.server)
            .field("store", &self.store)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Messages a user may send per UTC day.
    #[serde(default = "default_daily_quota")]
    pub daily_message_quota: u32,

    /// Maximum turns in one conversation.
    #[serde(default = "default_turn_cap")]
    pub conversation_turn_cap: u32,

    /// Minimum seconds between two messages from the same user.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_daily_quota() -> u32 {
    200
}
fn default_turn_cap() -> u32 {
    100
}
fn default_cooldown_secs() -> u64 {
    2
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            daily_message_quota: default_daily_quota(),
            conversation_turn_cap: default_turn_cap(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether the response cache participates at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Entry validity window in minutes.
    #[serde(default = "default_cache_ttl_minutes")]
    pub ttl_minutes: u64,
}

fn default_cache_ttl_minutes() -> u64 {
    60
}
fn default_true() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_minutes: default_cache_ttl_minutes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Recent messages kept verbatim when pruning triggers.
    #[serde(default = "default_recent_window")]
    pub recent_window: usize,

    /// Estimated history tokens above which pruning triggers.
    #[serde(default = "default_prune_threshold")]
    pub prune_threshold_tokens: usize,

    /// Total context budget (summary + recent + system) per model call.
    #[serde(default = "default_context_budget")]
    pub context_budget_tokens: usize,

    /// Output cap for the summarization call itself.
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: u32,
}

fn default_recent_window() -> usize {
    6
}
fn default_prune_threshold() -> usize {
    3000
}
fn default_context_budget() -> usize {
    8192
}
fn default_summary_max_tokens() -> u32 {
    512
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            recent_window: default_recent_window(),
            prune_threshold_tokens: default_prune_threshold(),
            context_budget_tokens: default_context_budget(),
            summary_max_tokens: default_summary_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Chunks returned per query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Minimum cosine similarity for a chunk to be included.
    #[serde(default = "default_min_relevance")]
    pub min_relevance: f32,

    /// Embedding model requested from the provider chain.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

fn default_top_k() -> usize {
    4
}
fn default_min_relevance() -> f32 {
    0.35
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_relevance: default_min_relevance(),
            embedding_model: default_embedding_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum output tokens per turn.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Maximum sequential model rounds in the tool loop.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
}

fn default_temperature() -> f32 {
    0.3
}
fn default_max_output_tokens() -> u32 {
    1024
}
fn default_max_tool_rounds() -> u32 {
    5
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            max_tool_rounds: default_max_tool_rounds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8321
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "memory" or "sqlite".
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// SQLite database path (ignored for the memory backend).
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_backend() -> String {
    "memory".into()
}
fn default_store_path() -> String {
    "aula.db".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: default_store_path(),
        }
    }
}

/// Configuration loading errors.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config io error: {e}"),
            Self::Parse(e) => write!(f, "config parse error: {e}"),
            Self::Invalid(e) => write!(f, "invalid config: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl PipelineConfig {
    /// Load from a TOML file, then apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        let mut config: Self =
            toml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides: `AULA_API_KEY` fills any provider entry
    /// without an explicit key; `AULA_PORT` overrides the server port.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("AULA_API_KEY") {
            for p in &mut self.providers {
                if p.api_key.is_none() {
                    p.api_key = Some(key.clone());
                }
            }
        }
        if let Ok(port) = std::env::var("AULA_PORT")
            && let Ok(port) = port.parse::<u16>()
        {
            self.server.port = port;
        }
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for p in &self.providers {
            match p.kind.as_str() {
                "anthropic" | "openai" => {}
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "provider '{}': unknown kind '{}'",
                        p.name, other
                    )));
                }
            }
        }
        if self.context.recent_window == 0 {
            return Err(ConfigError::Invalid(
                "context.recent_window must be at least 1".into(),
            ));
        }
        if self.context.prune_threshold_tokens >= self.context.context_budget_tokens {
            return Err(ConfigError::Invalid(
                "context.prune_threshold_tokens must be below context_budget_tokens".into(),
            ));
        }
        if self.model.max_tool_rounds == 0 {
            return Err(ConfigError::Invalid(
                "model.max_tool_rounds must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retrieval.min_relevance) {
            return Err(ConfigError::Invalid(
                "retrieval.min_relevance must be within 0.0..=1.0".into(),
            ));
        }
        match self.store.backend.as_str() {
            "memory" | "sqlite" => Ok(()),
            other => Err(ConfigError::Invalid(format!(
                "store.backend must be 'memory' or 'sqlite', got '{other}'"
            ))),
        }
    }
}
