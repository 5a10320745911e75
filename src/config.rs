//! Configuration management for groundline
//!
//! Token budgets, retrieval tuning and provider selection, persisted as
//! TOML at ~/.groundline/config.toml.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Which LLM provider backs token counting and summarization
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Google Gemini REST API
    #[default]
    Gemini,
    /// No provider: heuristic token counts, no summaries
    Disabled,
}

impl ProviderKind {
    /// Display name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Disabled => "disabled",
        }
    }

    /// Get all available options
    pub fn all() -> Vec<Self> {
        vec![Self::Gemini, Self::Disabled]
    }
}

/// History budget tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BudgetConfig {
    /// History above this many tokens gets summarized
    pub max_history_tokens: usize,
    /// Messages always kept verbatim
    pub recent_messages_count: usize,
    /// Serves per summary before it is regenerated
    pub summary_refresh_cycle: u32,
    /// Upper bound on messages loaded per conversation
    pub history_load_cap: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_history_tokens: 2000,
            recent_messages_count: 20,
            summary_refresh_cycle: 5,
            history_load_cap: 1000,
        }
    }
}

/// Retrieval tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Chunks returned when the caller does not ask for a count
    pub default_limit: usize,
    /// Chunks returned for a greeting
    pub greeting_limit: usize,
    /// Words per crawl-page window
    pub crawl_window_words: usize,
    /// Query result cache lifetime; 0 disables caching
    pub cache_ttl_secs: u64,
    /// Most cached queries kept before the least recent is evicted
    pub cache_max_entries: usize,
    /// Use the Tantivy full-text index before keyword scoring
    pub full_text: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: 8,
            greeting_limit: 3,
            crawl_window_words: 500,
            cache_ttl_secs: 300,
            cache_max_entries: 1000,
            full_text: true,
        }
    }
}

impl RetrievalConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// LLM provider settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub base_url: String,
    /// Characters of history sent to the summarizer
    pub summary_input_chars: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            model: "gemini-1.5-flash".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            summary_input_chars: 8000,
        }
    }
}

impl ProviderConfig {
    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env)
            .with_context(|| format!("{} environment variable not set", self.api_key_env))
    }
}

/// Per-turn limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TurnConfig {
    /// Deadline for every backend call in a turn
    pub deadline_secs: u64,
    /// Hard ceiling on the assembled context
    pub max_context_tokens: usize,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            deadline_secs: 30,
            max_context_tokens: 32_000,
        }
    }
}

impl TurnConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

/// groundline configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub turn: TurnConfig,
    /// Tracing filter used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Version of config schema (for future migrations)
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            budget: BudgetConfig::default(),
            retrieval: RetrievalConfig::default(),
            provider: ProviderConfig::default(),
            turn: TurnConfig::default(),
            log_level: default_log_level(),
            version: default_version(),
        }
    }
}

impl Config {
    /// Get the config file path (~/.groundline/config.toml)
    pub fn path() -> Result<PathBuf> {
        Ok(base_dir()?.join("config.toml"))
    }

    /// Check if config exists (i.e., not first run)
    pub fn exists() -> bool {
        Self::path().map(|p| p.exists()).unwrap_or(false)
    }

    /// Load config from disk, or return None if it doesn't exist
    pub fn load() -> Result<Option<Self>> {
        let path = Self::path()?;
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .context("Failed to read config file")?;
        let config: Self = toml::from_str(&content)
            .context("Failed to parse config file")?;
        Ok(Some(config))
    }

    /// Load config from disk, falling back to defaults on first run
    pub fn load_or_default() -> Result<Self> {
        Ok(Self::load()?.unwrap_or_default())
    }

    /// Save config to disk
    pub fn save(&self) -> Result<()> {
        let path = Self::path()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;
        std::fs::write(&path, content)
            .context("Failed to write config file")?;

        Ok(())
    }
}

/// Get the base directory path (~/.groundline)
pub fn base_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".groundline"))
}

/// Get the data directory path (~/.groundline/data)
pub fn data_dir() -> Result<PathBuf> {
    Ok(base_dir()?.join("data"))
}
