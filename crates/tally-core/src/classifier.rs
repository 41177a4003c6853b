//! Result classification
//!
//! Maps the raw result of an analysis call onto an [`Outcome`]. Everything
//! here is pure and synchronous so it can be tested against literal fixtures.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::outcome::{AnalysisSummary, OverloadCause, Outcome};
use crate::ports::analysis::{AnalysisPayload, TransportError};

/// Reasons a response body is not a usable analysis object
#[derive(Debug, Error)]
pub enum ClassificationFailure {
    /// The body is not JSON at all
    #[error("Response is not valid JSON: {0}")]
    InvalidJson(String),

    /// The body is JSON but not an object
    #[error("Response is not a JSON object")]
    NotAnObject,

    /// Required fields are missing or have the wrong type
    #[error("Response has missing or invalid fields: {0}")]
    InvalidFields(String),
}

/// Content of a well-formed analysis response
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedPayload {
    NoContent,
    Content(AnalysisSummary),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPayload {
    #[allow(dead_code)]
    no_content: bool,
    total_amount: f64,
    confidence: i64,
    description: String,
}

/// Classifies the result of an analysis call
///
/// Interruption-class transport failures become `TransientInterruption`,
/// every other failure and every malformed body becomes `ServiceOverloaded`.
pub fn classify(raw: Result<AnalysisPayload, TransportError>) -> Outcome {
    match raw {
        Err(err) if err.is_interruption() => Outcome::TransientInterruption { kind: err.kind },
        Err(err) => Outcome::ServiceOverloaded {
            cause: OverloadCause::Transport(err.kind),
        },
        Ok(payload) => match parse_payload(&payload.text) {
            Ok(ParsedPayload::NoContent) => Outcome::NoContent,
            Ok(ParsedPayload::Content(summary)) => Outcome::Success {
                summary,
                raw_payload: payload.text,
            },
            Err(_) => Outcome::ServiceOverloaded {
                cause: OverloadCause::MalformedPayload,
            },
        },
    }
}

/// Parses a response body
///
/// An explicit `"noContent": true` wins over every other field; otherwise all
/// four fields must be present with the right types.
pub fn parse_payload(text: &str) -> Result<ParsedPayload, ClassificationFailure> {
    let value = first_json_value(text)
        .map_err(|e| ClassificationFailure::InvalidJson(e.to_string()))?;

    let object = value.as_object().ok_or(ClassificationFailure::NotAnObject)?;
    if object.get("noContent").and_then(Value::as_bool) == Some(true) {
        return Ok(ParsedPayload::NoContent);
    }

    let raw: RawPayload = serde_json::from_value(value)
        .map_err(|e| ClassificationFailure::InvalidFields(e.to_string()))?;

    Ok(ParsedPayload::Content(AnalysisSummary {
        total_amount: raw.total_amount,
        confidence: raw.confidence,
        description: raw.description,
    }))
}

/// Reads the first JSON value starting at the first `{`, ignoring any prose
/// or code fence around it. Text without `{` is parsed as a whole.
fn first_json_value(text: &str) -> Result<Value, serde_json::Error> {
    let Some(start) = text.find('{') else {
        return serde_json::from_str(text);
    };

    serde_json::Deserializer::from_str(&text[start..])
        .into_iter::<Value>()
        .next()
        .unwrap_or_else(|| serde_json::from_str(""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::analysis::TransportErrorKind;

    fn ok(text: &str) -> Result<AnalysisPayload, TransportError> {
        Ok(AnalysisPayload::new(text))
    }

    fn err(kind: TransportErrorKind) -> Result<AnalysisPayload, TransportError> {
        Err(TransportError::new(kind, "test"))
    }

    // === Payload classification ===

    #[test]
    fn test_success_payload() {
        let text = r#"{"noContent":false,"totalAmount":42,"confidence":8,"description":"pasta"}"#;
        match classify(ok(text)) {
            Outcome::Success {
                summary,
                raw_payload,
            } => {
                assert_eq!(summary.total_amount, 42.0);
                assert_eq!(summary.confidence, 8);
                assert_eq!(summary.description, "pasta");
                assert_eq!(raw_payload, text);
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[test]
    fn test_no_content_payload() {
        let text = r#"{"noContent":true,"totalAmount":0,"confidence":0,"description":""}"#;
        assert_eq!(classify(ok(text)), Outcome::NoContent);
    }

    #[test]
    fn test_no_content_wins_regardless_of_other_fields() {
        let fixtures = [
            r#"{"noContent":true,"totalAmount":950,"confidence":10,"description":"pizza"}"#,
            r#"{"noContent":true}"#,
            r#"{"noContent":true,"totalAmount":"lots","confidence":null}"#,
            r#"{"description":"ignored","noContent":true,"confidence":-3}"#,
        ];
        for text in fixtures {
            assert_eq!(classify(ok(text)), Outcome::NoContent, "fixture: {}", text);
        }
    }

    #[test]
    fn test_malformed_json_is_overloaded() {
        let outcome = classify(ok("{\"noContent\": false, \"totalAmount\": "));
        assert_eq!(
            outcome,
            Outcome::ServiceOverloaded {
                cause: OverloadCause::MalformedPayload
            }
        );
    }

    #[test]
    fn test_partially_missing_fields_are_overloaded() {
        let fixtures = [
            r#"{"noContent":false,"totalAmount":42,"confidence":8}"#,
            r#"{"noContent":false,"confidence":8,"description":"pasta"}"#,
            r#"{"totalAmount":42,"confidence":8,"description":"pasta"}"#,
            r#"{"noContent":false,"totalAmount":"42","confidence":8,"description":"pasta"}"#,
            r#"{"noContent":false,"totalAmount":42,"confidence":8.5,"description":"pasta"}"#,
        ];
        for text in fixtures {
            assert_eq!(
                classify(ok(text)),
                Outcome::ServiceOverloaded {
                    cause: OverloadCause::MalformedPayload
                },
                "fixture: {}",
                text
            );
        }
    }

    #[test]
    fn test_non_object_json_is_overloaded() {
        assert!(matches!(
            parse_payload("[1, 2, 3]"),
            Err(ClassificationFailure::InvalidJson(_)) | Err(ClassificationFailure::NotAnObject)
        ));
        assert!(matches!(
            classify(ok("\"just a string\"")),
            Outcome::ServiceOverloaded { .. }
        ));
    }

    #[test]
    fn test_payload_wrapped_in_code_fence() {
        let text = "```json\n{\"noContent\":false,\"totalAmount\":310.5,\"confidence\":6,\"description\":\"salad\"}\n```";
        match parse_payload(text).unwrap() {
            ParsedPayload::Content(summary) => {
                assert_eq!(summary.total_amount, 310.5);
                assert_eq!(summary.description, "salad");
            }
            other => panic!("expected content, got {:?}", other),
        }
    }

    #[test]
    fn test_prose_without_json_is_invalid() {
        assert!(matches!(
            parse_payload("I could not analyze this image."),
            Err(ClassificationFailure::InvalidJson(_))
        ));
    }

    // === Transport classification ===

    #[test]
    fn test_interruption_errors_are_transient() {
        for kind in [
            TransportErrorKind::Cancelled,
            TransportErrorKind::ConnectionLost,
            TransportErrorKind::NotConnected,
        ] {
            assert_eq!(
                classify(err(kind)),
                Outcome::TransientInterruption { kind }
            );
        }
    }

    #[test]
    fn test_other_transport_errors_are_overloaded() {
        for kind in [
            TransportErrorKind::TimedOut,
            TransportErrorKind::Overloaded,
            TransportErrorKind::Unauthorized,
            TransportErrorKind::Rejected,
            TransportErrorKind::Provider,
            TransportErrorKind::InvalidResponse,
        ] {
            assert_eq!(
                classify(err(kind)),
                Outcome::ServiceOverloaded {
                    cause: OverloadCause::Transport(kind)
                }
            );
        }
    }

    #[test]
    fn test_first_json_value() {
        assert_eq!(
            first_json_value("Here: {\"key\": \"value\"} done").unwrap(),
            serde_json::json!({"key": "value"})
        );
        assert!(first_json_value("No JSON here").is_err());
    }

    #[test]
    fn test_trailing_prose_with_braces_is_ignored() {
        let text = "{\"noContent\":false,\"totalAmount\":480,\"confidence\":8,\"description\":\"pizza\"}\nNote: estimate assumes {two} slices.";
        match classify(ok(text)) {
            Outcome::Success { summary, .. } => {
                assert_eq!(summary.total_amount, 480.0);
                assert_eq!(summary.description, "pizza");
            }
            other => panic!("expected success, got {:?}", other),
        }
    }
}
