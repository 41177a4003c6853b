//! Analysis client port definition
//!
//! The remote analysis call is the only long-running operation in a capture
//! session. Its failures are reported as [`TransportError`] so the classifier
//! can tell suspension-induced interruptions apart from real failures.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::prompt::AnalysisPrompt;

/// A captured image handed to the analysis service
///
/// The pixel data is reference counted so the same capture can be shared by
/// the in-flight call and the history writer without copying.
#[derive(Debug, Clone)]
pub struct CapturedImage {
    /// Encoded image bytes (PNG, JPEG, ...)
    pub data: Arc<[u8]>,
    /// MIME type (e.g., "image/jpeg")
    pub media_type: String,
    /// Unix timestamp of capture
    pub timestamp: i64,
}

impl CapturedImage {
    /// Creates an image captured now
    pub fn new(data: impl Into<Arc<[u8]>>, media_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            media_type: media_type.into(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    /// Returns true if the image carries no bytes
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Size of the encoded image in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// File extension matching the media type
    pub fn extension(&self) -> &'static str {
        match self.media_type.as_str() {
            "image/jpeg" => "jpg",
            "image/gif" => "gif",
            "image/webp" => "webp",
            "image/heic" => "heic",
            _ => "png",
        }
    }
}

/// Raw response body returned by the analysis service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisPayload {
    /// Response text, expected to contain a JSON object
    pub text: String,
}

impl AnalysisPayload {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Network-layer failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// The request was cancelled before it completed
    Cancelled,
    /// An established connection dropped mid-request
    ConnectionLost,
    /// No connection could be established
    NotConnected,
    /// The request exceeded its deadline
    TimedOut,
    /// The service reported overload or rate limiting
    Overloaded,
    /// Credentials were missing or rejected
    Unauthorized,
    /// The service rejected the request as invalid
    Rejected,
    /// Any other provider-side failure
    Provider,
    /// The response could not be decoded at the transport level
    InvalidResponse,
}

impl TransportErrorKind {
    /// Returns true for failures caused by the host suspending network work
    /// rather than by the service itself.
    pub fn is_interruption(self) -> bool {
        matches!(
            self,
            TransportErrorKind::Cancelled
                | TransportErrorKind::ConnectionLost
                | TransportErrorKind::NotConnected
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransportErrorKind::Cancelled => "cancelled",
            TransportErrorKind::ConnectionLost => "connection-lost",
            TransportErrorKind::NotConnected => "not-connected",
            TransportErrorKind::TimedOut => "timed-out",
            TransportErrorKind::Overloaded => "overloaded",
            TransportErrorKind::Unauthorized => "unauthorized",
            TransportErrorKind::Rejected => "rejected",
            TransportErrorKind::Provider => "provider",
            TransportErrorKind::InvalidResponse => "invalid-response",
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by an [`AnalysisClient`]
#[derive(Debug, Clone, Error)]
#[error("Transport error ({kind}): {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Error used when the orchestrator abandons an in-flight call
    pub fn cancelled() -> Self {
        Self::new(TransportErrorKind::Cancelled, "analysis request was cancelled")
    }

    pub fn is_interruption(&self) -> bool {
        self.kind.is_interruption()
    }
}

/// Port for the remote analysis call
///
/// Implementations must be cancel-safe: the orchestrator abandons the
/// returned future when a session is cancelled.
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    /// Analyze a single image with the given prompt
    async fn analyze(
        &self,
        image: &CapturedImage,
        prompt: &AnalysisPrompt,
    ) -> Result<AnalysisPayload, TransportError>;
}
