//! Flow navigation
//!
//! Maps outcomes to what the user should see next. Pure apart from minting
//! correlation ids for the overload screen.

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::outcome::{Outcome, SessionPhase};

/// How the analyzed input was supplied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputModality {
    #[default]
    SingleImage,
    ImageBatch,
    ExternalLink,
}

impl InputModality {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputModality::SingleImage => "single",
            InputModality::ImageBatch => "batch",
            InputModality::ExternalLink => "link",
        }
    }
}

impl fmt::Display for InputModality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InputModality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single" | "image" => Ok(InputModality::SingleImage),
            "batch" | "images" => Ok(InputModality::ImageBatch),
            "link" | "url" => Ok(InputModality::ExternalLink),
            _ => Err(format!(
                "Invalid input modality '{}'. Valid values: single, batch, link",
                s
            )),
        }
    }
}

/// Screen the caller should present
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayIntent {
    ShowResult {
        amount: f64,
        description: String,
    },
    ShowNothingRecognized {
        modality: InputModality,
    },
    StayInProgress,
    /// Carries a fresh id so support can match a report to the logs
    ShowOverloaded {
        correlation_id: Uuid,
    },
    ReturnToEntry,
}

/// Routes outcomes to display intents
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowNavigator {
    modality: InputModality,
}

impl FlowNavigator {
    pub fn new(modality: InputModality) -> Self {
        Self { modality }
    }

    pub fn modality(&self) -> InputModality {
        self.modality
    }

    pub fn route(&self, outcome: &Outcome) -> DisplayIntent {
        match outcome {
            Outcome::Success { summary, .. } => DisplayIntent::ShowResult {
                amount: summary.total_amount,
                description: summary.description.clone(),
            },
            Outcome::NoContent => DisplayIntent::ShowNothingRecognized {
                modality: self.modality,
            },
            Outcome::TransientInterruption { .. } => DisplayIntent::StayInProgress,
            Outcome::ServiceOverloaded { .. } => DisplayIntent::ShowOverloaded {
                correlation_id: Uuid::new_v4(),
            },
            Outcome::Cancelled => DisplayIntent::ReturnToEntry,
        }
    }

    /// Routes a session phase; anything unresolved keeps the progress screen
    pub fn route_phase(&self, phase: &SessionPhase) -> DisplayIntent {
        match phase {
            SessionPhase::Resolved(outcome) => self.route(outcome),
            SessionPhase::InFlight | SessionPhase::Interrupted(_) => DisplayIntent::StayInProgress,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{AnalysisSummary, OverloadCause};
    use crate::ports::analysis::TransportErrorKind;

    #[test]
    fn test_route_success() {
        let navigator = FlowNavigator::default();
        let outcome = Outcome::Success {
            summary: AnalysisSummary {
                total_amount: 512.0,
                confidence: 9,
                description: "ramen".to_string(),
            },
            raw_payload: "{}".to_string(),
        };

        assert_eq!(
            navigator.route(&outcome),
            DisplayIntent::ShowResult {
                amount: 512.0,
                description: "ramen".to_string()
            }
        );
    }

    #[test]
    fn test_route_no_content_carries_modality() {
        for modality in [
            InputModality::SingleImage,
            InputModality::ImageBatch,
            InputModality::ExternalLink,
        ] {
            let navigator = FlowNavigator::new(modality);
            assert_eq!(
                navigator.route(&Outcome::NoContent),
                DisplayIntent::ShowNothingRecognized { modality }
            );
        }
    }

    #[test]
    fn test_route_overloaded_mints_fresh_ids() {
        let navigator = FlowNavigator::default();
        let outcome = Outcome::ServiceOverloaded {
            cause: OverloadCause::MalformedPayload,
        };

        let first = navigator.route(&outcome);
        let second = navigator.route(&outcome);
        match (first, second) {
            (
                DisplayIntent::ShowOverloaded { correlation_id: a },
                DisplayIntent::ShowOverloaded { correlation_id: b },
            ) => {
                assert_ne!(a, b);
                assert_eq!(a.get_version_num(), 4);
            }
            other => panic!("expected overload intents, got {:?}", other),
        }
    }

    #[test]
    fn test_route_interruption_and_cancel() {
        let navigator = FlowNavigator::default();
        assert_eq!(
            navigator.route(&Outcome::TransientInterruption {
                kind: TransportErrorKind::NotConnected
            }),
            DisplayIntent::StayInProgress
        );
        assert_eq!(
            navigator.route(&Outcome::Cancelled),
            DisplayIntent::ReturnToEntry
        );
    }

    #[test]
    fn test_route_phase() {
        let navigator = FlowNavigator::default();
        assert_eq!(
            navigator.route_phase(&SessionPhase::InFlight),
            DisplayIntent::StayInProgress
        );
        assert_eq!(
            navigator.route_phase(&SessionPhase::Interrupted(TransportErrorKind::Cancelled)),
            DisplayIntent::StayInProgress
        );
        assert_eq!(
            navigator.route_phase(&SessionPhase::Resolved(Outcome::Cancelled)),
            DisplayIntent::ReturnToEntry
        );
    }

    #[test]
    fn test_modality_from_str() {
        assert_eq!(
            "batch".parse::<InputModality>().unwrap(),
            InputModality::ImageBatch
        );
        assert_eq!(
            "LINK".parse::<InputModality>().unwrap(),
            InputModality::ExternalLink
        );
        assert!("video".parse::<InputModality>().is_err());
    }
}
