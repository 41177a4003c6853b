//! History command
//!
//! Handles `tally history`: lists recent successful analyses.

use anyhow::{Context, Result};
use chrono::{Local, TimeZone};
use tally_core::HistoryEntry;

use crate::app::AppContext;

/// Print the most recent analyses, newest first
pub async fn run(ctx: &AppContext, limit: usize) -> Result<()> {
    let store = ctx.open_store().await?;
    let entries = store
        .recent_entries(limit)
        .await
        .context("Failed to read history")?;

    println!("Recent Analyses");
    println!("===============");
    println!();

    if entries.is_empty() {
        println!("No analyses yet.");
        println!("  Run 'tally analyze <IMAGE>' to get started.");
        return Ok(());
    }

    for entry in &entries {
        println!("{}", format_entry(entry));
    }

    Ok(())
}

fn format_entry(entry: &HistoryEntry) -> String {
    format!(
        "{}  {}\n    {}",
        format_timestamp(entry.created_at),
        entry.summary,
        entry.image_path
    )
}

/// Format timestamp as local time
fn format_timestamp(timestamp: i64) -> String {
    Local
        .timestamp_opt(timestamp, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}
