//! Configuration management for Tally
//!
//! Handles loading and validation of TOML configuration files.

use crate::error::ConfigError;
use crate::prompt::DEFAULT_INSTRUCTION;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure for Tally
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Session state machine settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// AI provider settings
    #[serde(default)]
    pub ai: AiConfig,

    /// Storage-related settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Daily quota settings
    #[serde(default)]
    pub usage: UsageConfig,

    /// Prompt settings
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OrchestratorConfig {
    /// Longest background stay tolerated before an in-flight analysis is
    /// abandoned, in milliseconds (default: 2000)
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// Re-issued calls allowed after an interrupted request (default: 1)
    #[serde(default = "default_resume_retries")]
    pub resume_retries: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
            resume_retries: default_resume_retries(),
        }
    }
}

/// AI provider configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AiConfig {
    /// Default AI provider: "claude" or "gemini"
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Model name to use; empty selects the provider's default model
    #[serde(default)]
    pub model: String,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            model: String::new(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Base data directory (default: ~/.tally/)
    #[serde(
        default = "default_data_dir",
        deserialize_with = "deserialize_data_dir"
    )]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Usage quota configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UsageConfig {
    /// Successful analyses per day on the free tier (default: 3)
    #[serde(default = "default_free_daily_limit")]
    pub free_daily_limit: u32,

    /// Successful analyses per day on the premium tier (default: 100)
    #[serde(default = "default_premium_daily_limit")]
    pub premium_daily_limit: u32,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            free_daily_limit: default_free_daily_limit(),
            premium_daily_limit: default_premium_daily_limit(),
        }
    }
}

/// Analysis prompt configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalysisConfig {
    /// What the service should total up in each image
    #[serde(default = "default_instruction")]
    pub instruction: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            instruction: default_instruction(),
        }
    }
}

// Default value functions
fn default_grace_period_ms() -> u64 {
    2000
}

fn default_resume_retries() -> u32 {
    1
}

fn default_provider() -> String {
    "claude".to_string()
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tally")
}

fn default_free_daily_limit() -> u32 {
    3
}

fn default_premium_daily_limit() -> u32 {
    100
}

fn default_instruction() -> String {
    DEFAULT_INSTRUCTION.to_string()
}

/// Expands tilde (~) in a path to the home directory
fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    if let Some(rest) = path_str.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path_str == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    path.to_path_buf()
}

/// Custom deserializer for data_dir that expands tilde
fn deserialize_data_dir<'de, D>(deserializer: D) -> Result<PathBuf, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let path_str = String::deserialize(deserializer)?;
    Ok(expand_tilde(&PathBuf::from(path_str)))
}

impl Config {
    /// Validates the configuration values
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` if:
    /// - `orchestrator.grace_period_ms` is 0
    /// - `ai.default_provider` is not "claude" or "gemini"
    /// - `usage.premium_daily_limit` is below `usage.free_daily_limit`
    /// - `analysis.instruction` is blank
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.orchestrator.grace_period_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "grace_period_ms must be > 0".to_string(),
            ));
        }

        if !["claude", "gemini"].contains(&self.ai.default_provider.as_str()) {
            return Err(ConfigError::InvalidValue(
                "default_provider must be 'claude' or 'gemini'".to_string(),
            ));
        }

        if self.usage.premium_daily_limit < self.usage.free_daily_limit {
            return Err(ConfigError::InvalidValue(
                "premium_daily_limit must be >= free_daily_limit".to_string(),
            ));
        }

        if self.analysis.instruction.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "instruction must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Returns the default configuration file path (`~/.tally/config.toml`)
pub fn get_default_config_path() -> PathBuf {
    default_data_dir().join("config.toml")
}

/// Loads configuration from the specified path
///
/// If the file doesn't exist, creates a default configuration file.
/// If the file is invalid or contains invalid values, returns default configuration.
///
/// # Errors
/// Only IO errors during file creation or reading are returned
pub fn load_config_from_path(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let default_config = Config::default();
        let toml_str = toml::to_string_pretty(&default_config)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, &toml_str)?;

        tracing::info!("Created default configuration file at {:?}", path);
        return Ok(default_config);
    }

    let content = fs::read_to_string(path)?;

    let config: Config = match toml::from_str(&content) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(
                "Failed to parse configuration file {:?}: {}. Using default configuration.",
                path,
                e
            );
            return Ok(Config::default());
        }
    };

    if let Err(e) = config.validate() {
        tracing::warn!(
            "Invalid configuration in {:?}: {}. Using default configuration.",
            path,
            e
        );
        return Ok(Config::default());
    }

    Ok(config)
}

/// Loads configuration from the default path (`~/.tally/config.toml`)
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from_path(&get_default_config_path())
}
