//! Usage quota port definition

use async_trait::async_trait;
use thiserror::Error;

/// Subscription tier used to look up the quota limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tier {
    #[default]
    Free,
    Premium,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Premium => "premium",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "premium" | "pro" => Ok(Tier::Premium),
            _ => Err(format!("Unknown tier: {}", s)),
        }
    }
}

/// Errors that can occur while reading or charging the quota
#[derive(Debug, Error)]
pub enum UsageError {
    /// Database operation failed
    #[error("Usage database error: {0}")]
    DatabaseError(String),

    /// Connection to the usage store failed
    #[error("Usage store connection error: {0}")]
    ConnectionError(String),
}

/// Port for the analysis quota
///
/// The orchestrator only ever calls `record_success`, and only after a
/// session resolved as a success. `remaining` is for callers deciding whether
/// to offer a capture at all.
#[async_trait]
pub trait UsageGate: Send + Sync {
    /// Number of analyses still available today for the tier
    async fn remaining(&self, tier: Tier) -> Result<u32, UsageError>;

    /// Charge one successful analysis against the quota
    async fn record_success(&self) -> Result<(), UsageError>;
}
