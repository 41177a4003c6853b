//! History port definition

use async_trait::async_trait;
use thiserror::Error;

use super::analysis::CapturedImage;

/// A persisted successful analysis
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    /// Database ID (auto-increment)
    pub id: Option<i64>,
    /// Unix timestamp of the capture
    pub captured_at: i64,
    /// Path to the stored copy of the image
    pub image_path: String,
    /// Human readable summary shown in the history list
    pub summary: String,
    /// Raw service response, kept for re-parsing
    pub raw_payload: String,
    /// Record creation timestamp
    pub created_at: i64,
}

/// Errors that can occur while writing history
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Database operation failed
    #[error("History database error: {0}")]
    DatabaseError(String),

    /// Connection to the history store failed
    #[error("History store connection error: {0}")]
    ConnectionError(String),

    /// IO error while storing the image
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Port for persisting completed analyses
#[async_trait]
pub trait HistoryRecorder: Send + Sync {
    /// Record a successful analysis of `image`
    async fn record(
        &self,
        image: &CapturedImage,
        summary: &str,
        raw_payload: &str,
    ) -> Result<(), HistoryError>;
}
