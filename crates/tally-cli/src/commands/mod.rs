//! CLI command implementations
//!
//! Each subcommand has its own module with the implementation logic.

pub mod analyze;
pub mod config;
pub mod history;
pub mod usage;
