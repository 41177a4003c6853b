//! Config command
//!
//! Handles `tally config`: prints the effective configuration.

use anyhow::{Context, Result};
use tally_core::{AIProvider, ApiKeyManager, Config};

use crate::app::AppContext;

/// Print the configuration in effect, after defaults and validation
pub fn run(ctx: &AppContext) -> Result<()> {
    println!("# Loaded from {}", ctx.config_path.display());
    println!();
    println!("{}", render(ctx.config())?);

    println!("# API keys");
    for provider in [AIProvider::Claude, AIProvider::Gemini] {
        let state = if ApiKeyManager::is_key_available(provider) {
            "set"
        } else {
            "not set"
        };
        println!("#   {}: {}", provider.env_var_name(), state);
    }

    Ok(())
}

fn render(config: &Config) -> Result<String> {
    toml::to_string_pretty(config).context("Failed to serialize configuration")
}
