//! Tally Adapters - Infrastructure implementations
//!
//! This crate contains concrete implementations of the ports defined in tally-core:
//! AI provider clients, the analysis client built on them, SQLite history and
//! usage storage, and job-control lifecycle signals.

pub mod ai;
pub mod analysis_client;
#[cfg(unix)]
pub mod lifecycle;
pub mod storage;

// Re-export primary adapter types
pub use analysis_client::{media_type_for_path, AiAnalysisClient};
pub use storage::SqliteStore;

#[cfg(unix)]
pub use lifecycle::SignalLifecycle;
