//! Tally Core - Domain logic for the Tally capture-and-analyze assistant
//!
//! This crate contains the session state machine, result classification,
//! navigation, and the port definitions adapters implement, following the
//! Hexagonal Architecture pattern.

pub mod api_key;
pub mod classifier;
pub mod config;
pub mod directory;
pub mod error;
pub mod logging;
pub mod navigator;
pub mod orchestrator;
pub mod outcome;
pub mod ports;
pub mod prompt;
pub mod session;

// Re-export primary types for convenient access
pub use api_key::{
    AIProvider, ApiKeyManager, SecretApiKey, ANTHROPIC_API_KEY_ENV, GOOGLE_AI_API_KEY_ENV,
};
pub use classifier::{classify, parse_payload, ClassificationFailure, ParsedPayload};
pub use config::{
    get_default_config_path, load_config, load_config_from_path, AiConfig, AnalysisConfig, Config,
    OrchestratorConfig, StorageConfig, UsageConfig,
};
pub use directory::DirectoryManager;
pub use error::{ConfigError, TallyError};
pub use logging::{init_logger, LogLevel, LoggerConfig, LoggerError, LoggerGuard};
pub use navigator::{DisplayIntent, FlowNavigator, InputModality};
pub use orchestrator::{
    CaptureAnalyzeOrchestrator, OrchestratorError, OrchestratorSettings, OutcomeWatcher,
};
pub use outcome::{AnalysisSummary, OverloadCause, Outcome, SessionPhase};
pub use ports::{
    AIProviderPort, AnalysisClient, AnalysisPayload, CapturedImage, HistoryEntry, HistoryError,
    HistoryRecorder, LifecycleBroadcaster, LifecycleEvent, LifecycleSignal, Tier, TransportError,
    TransportErrorKind, UsageError, UsageGate,
};
pub use prompt::{AnalysisPrompt, PromptBuilder, DEFAULT_INSTRUCTION};
pub use session::{CaptureSession, SessionError, SessionId, SessionSequence};
