//! Common error types for Tally
//!
//! Domain-specific errors are defined next to the port or component that
//! raises them and re-exported here.

use thiserror::Error;

pub use crate::classifier::ClassificationFailure;
pub use crate::logging::LoggerError;
pub use crate::orchestrator::OrchestratorError;
pub use crate::ports::ai::AIError;
pub use crate::ports::analysis::TransportError;
pub use crate::ports::history::HistoryError;
pub use crate::ports::usage::UsageError;
pub use crate::session::SessionError;

/// Top-level error type for Tally operations
#[derive(Debug, Error)]
pub enum TallyError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Session could not be opened
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Orchestrator refused a request
    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    /// Remote analysis call failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Usage store errors
    #[error("Usage error: {0}")]
    Usage(#[from] UsageError),

    /// History store errors
    #[error("History error: {0}")]
    History(#[from] HistoryError),

    /// AI provider errors
    #[error("AI error: {0}")]
    AI(#[from] AIError),

    /// Logger errors
    #[error("Logger error: {0}")]
    Logger(#[from] LoggerError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// Parse error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Invalid value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
