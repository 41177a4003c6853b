//! API key management for AI providers
//!
//! Keys are read from environment variables and wrapped so they never end up
//! in logs.

use crate::ports::ai::AIError;
use std::env;
use std::fmt;

/// Environment variable name for Anthropic API key
pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Environment variable name for Google AI API key
pub const GOOGLE_AI_API_KEY_ENV: &str = "GOOGLE_AI_API_KEY";

/// A wrapper for API keys that prevents accidental logging
#[derive(Clone)]
pub struct SecretApiKey {
    key: String,
}

impl SecretApiKey {
    /// Wraps a key; returns `None` for empty or whitespace-only input
    pub fn new(key: String) -> Option<Self> {
        let trimmed = key.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self {
                key: trimmed.to_string(),
            })
        }
    }

    /// Returns the actual API key value
    ///
    /// Use this only when building a request. Never log the returned value.
    pub fn expose(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for SecretApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretApiKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl fmt::Display for SecretApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED API KEY]")
    }
}

/// AI provider types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AIProvider {
    Claude,
    Gemini,
}

impl AIProvider {
    /// Environment variable holding this provider's API key
    pub fn env_var_name(&self) -> &'static str {
        match self {
            AIProvider::Claude => ANTHROPIC_API_KEY_ENV,
            AIProvider::Gemini => GOOGLE_AI_API_KEY_ENV,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            AIProvider::Claude => "Anthropic Claude",
            AIProvider::Gemini => "Google Gemini",
        }
    }

    /// Model used when the configuration leaves `ai.model` empty
    pub fn default_model(&self) -> &'static str {
        match self {
            AIProvider::Claude => "claude-3-5-sonnet-20241022",
            AIProvider::Gemini => "gemini-2.0-flash",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AIProvider::Claude => "claude",
            AIProvider::Gemini => "gemini",
        }
    }
}

impl fmt::Display for AIProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AIProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "claude" | "anthropic" => Ok(AIProvider::Claude),
            "gemini" | "google" => Ok(AIProvider::Gemini),
            _ => Err(format!("Unknown AI provider: {}", s)),
        }
    }
}

/// Manages API keys for AI providers
pub struct ApiKeyManager;

impl ApiKeyManager {
    /// Loads the provider's API key from the process environment
    ///
    /// # Errors
    /// Returns `AIError::Unauthorized` if the key is not set or empty
    ///
    /// # Example
    /// ```no_run
    /// use tally_core::api_key::{ApiKeyManager, AIProvider};
    ///
    /// let key = ApiKeyManager::load_api_key(AIProvider::Claude)
    ///     .expect("API key not set");
    /// ```
    pub fn load_api_key(provider: AIProvider) -> Result<SecretApiKey, AIError> {
        Self::load_api_key_from(provider, |name| env::var(name).ok())
    }

    /// Loads the provider's API key through a variable lookup
    pub fn load_api_key_from<F>(provider: AIProvider, lookup: F) -> Result<SecretApiKey, AIError>
    where
        F: FnOnce(&str) -> Option<String>,
    {
        lookup(provider.env_var_name())
            .and_then(SecretApiKey::new)
            .ok_or(AIError::Unauthorized)
    }

    /// User-facing setup instructions for a missing key
    pub fn missing_key_guidance(provider: AIProvider) -> String {
        let env_var = provider.env_var_name();
        let provider_name = provider.display_name();

        format!(
            r#"{provider_name} API key is not configured.

Set the environment variable before running tally:
   export {env_var}=your-api-key-here

Or switch providers with --provider, or [ai] default_provider in config.toml.

For more information:
- Claude: https://console.anthropic.com/
- Gemini: https://aistudio.google.com/"#
        )
    }

    /// Checks whether a key is set without exposing it
    pub fn is_key_available(provider: AIProvider) -> bool {
        Self::load_api_key(provider).is_ok()
    }
}
