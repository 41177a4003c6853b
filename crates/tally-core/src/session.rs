//! Capture sessions
//!
//! A [`CaptureSession`] is one capture-to-outcome attempt. Ids come from a
//! [`SessionSequence`] owned by whoever drives captures.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::ports::analysis::CapturedImage;

/// Monotonically increasing session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Captured image is empty")]
    EmptyImage,
}

/// Issues session ids in increasing order
#[derive(Debug, Default)]
pub struct SessionSequence {
    next: AtomicU64,
}

impl SessionSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a session for a freshly captured image
    ///
    /// # Errors
    /// Returns `SessionError::EmptyImage` if the image has no bytes
    pub fn open(&self, image: CapturedImage) -> Result<CaptureSession, SessionError> {
        if image.is_empty() {
            return Err(SessionError::EmptyImage);
        }

        let id = SessionId(self.next.fetch_add(1, Ordering::Relaxed) + 1);
        Ok(CaptureSession {
            id,
            image,
            opened_at: Utc::now(),
        })
    }
}

/// One capture-to-outcome attempt
#[derive(Debug, Clone)]
pub struct CaptureSession {
    id: SessionId,
    image: CapturedImage,
    opened_at: DateTime<Utc>,
}

impl CaptureSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn image(&self) -> &CapturedImage {
        &self.image
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }
}
