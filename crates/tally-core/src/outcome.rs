//! Outcome model for a capture session

use std::fmt;

use crate::ports::analysis::TransportErrorKind;

/// Figures extracted from a well-formed analysis response
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisSummary {
    /// Total reported by the service (e.g., calories)
    pub total_amount: f64,
    /// Self-reported confidence, 0 to 10
    pub confidence: i64,
    /// Short description of what was recognized
    pub description: String,
}

impl AnalysisSummary {
    /// One-line text stored alongside the history entry
    pub fn summary_text(&self) -> String {
        format!("{}: {}", self.description, format_amount(self.total_amount))
    }
}

/// Why a session ended in the overload screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverloadCause {
    /// Non-interruption transport failure
    Transport(TransportErrorKind),
    /// Response body was not a well-formed analysis object
    MalformedPayload,
}

impl fmt::Display for OverloadCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverloadCause::Transport(kind) => write!(f, "transport:{}", kind),
            OverloadCause::MalformedPayload => write!(f, "malformed-payload"),
        }
    }
}

/// Classified result of a capture session
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success {
        summary: AnalysisSummary,
        raw_payload: String,
    },
    /// The service reported nothing recognizable in the image
    NoContent,
    /// The call died because the host suspended network work
    TransientInterruption { kind: TransportErrorKind },
    /// The service failed, rate limited us, or answered with garbage
    ServiceOverloaded { cause: OverloadCause },
    /// Abandoned after prolonged backgrounding or by the user
    Cancelled,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    /// Whether this outcome closes the session
    ///
    /// An interruption leaves the session waiting for a resume.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Outcome::TransientInterruption { .. })
    }

    /// Stable name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Outcome::Success { .. } => "success",
            Outcome::NoContent => "no-content",
            Outcome::TransientInterruption { .. } => "transient-interruption",
            Outcome::ServiceOverloaded { .. } => "service-overloaded",
            Outcome::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success { summary, .. } => write!(f, "success ({})", summary.summary_text()),
            Outcome::TransientInterruption { kind } => write!(f, "transient-interruption ({})", kind),
            Outcome::ServiceOverloaded { cause } => write!(f, "service-overloaded ({})", cause),
            other => f.write_str(other.name()),
        }
    }
}

/// Observable phase of the active session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionPhase {
    /// The remote call is running
    InFlight,
    /// The last call was interrupted; waiting for a resume to retry
    Interrupted(TransportErrorKind),
    /// A terminal outcome has been emitted
    Resolved(Outcome),
}

impl SessionPhase {
    pub fn is_resolved(&self) -> bool {
        matches!(self, SessionPhase::Resolved(_))
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        match self {
            SessionPhase::Resolved(outcome) => Some(outcome),
            _ => None,
        }
    }
}

fn format_amount(amount: f64) -> String {
    if amount.fract() == 0.0 {
        format!("{:.0}", amount)
    } else {
        format!("{:.1}", amount)
    }
}
