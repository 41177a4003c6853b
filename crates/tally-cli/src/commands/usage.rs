//! Usage command
//!
//! Handles `tally usage`: shows today's quota and how much of it is left.

use anyhow::{Context, Result};
use std::path::Path;
use tally_core::{Tier, UsageGate};

use crate::app::AppContext;

/// Show today's usage for a tier
pub async fn run(ctx: &AppContext, tier: Tier) -> Result<()> {
    let store = ctx.open_store().await?;

    let used = store.used_today().await.context("Failed to read usage")?;
    let remaining = store
        .remaining(tier)
        .await
        .context("Failed to read usage")?;

    let limits = &ctx.config().usage;
    let limit = match tier {
        Tier::Free => limits.free_daily_limit,
        Tier::Premium => limits.premium_daily_limit,
    };

    println!("Tally Usage");
    println!("===========");
    println!();
    println!("  Tier: {}", tier);
    println!("  Used today: {} of {}", used, limit);
    println!("  Remaining: {}", remaining);

    let captures_dir = ctx.directories().captures_dir();
    let size = calculate_directory_size(&captures_dir).unwrap_or(0);
    println!();
    println!("  Stored images: {}", format_storage_size(size));

    Ok(())
}

/// Calculate total size of files in a directory
fn calculate_directory_size(dir: &Path) -> std::io::Result<u64> {
    let mut total = 0;

    for entry in std::fs::read_dir(dir)? {
        let metadata = entry?.metadata()?;
        if metadata.is_file() {
            total += metadata.len();
        }
    }

    Ok(total)
}

/// Format storage size in human-readable format
fn format_storage_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
