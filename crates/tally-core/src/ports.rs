//! Port definitions for Hexagonal Architecture
//!
//! These traits define the boundaries between the orchestration core and the
//! outside world: the remote analysis service, the usage quota, the history
//! store and the host's suspend/resume notifications.

pub mod ai;
pub mod analysis;
pub mod history;
pub mod lifecycle;
pub mod usage;

pub use ai::{AIError, AIProviderPort, AIResponse, ImageData, MultimodalPrompt, UserMessage};
pub use analysis::{
    AnalysisClient, AnalysisPayload, CapturedImage, TransportError, TransportErrorKind,
};
pub use history::{HistoryEntry, HistoryError, HistoryRecorder};
pub use lifecycle::{LifecycleBroadcaster, LifecycleEvent, LifecycleSignal};
pub use usage::{Tier, UsageError, UsageGate};
