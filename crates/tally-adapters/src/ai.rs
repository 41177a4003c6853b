//! AI provider adapter implementations
//!
//! Contains Claude and Gemini API adapters implementing the AIProviderPort
//! trait, plus the HTTP failure mapping they share. The mapping keeps
//! connection-level failures distinguishable because the orchestrator treats
//! them as suspension-induced interruptions.

mod claude;
mod gemini;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tally_core::api_key::{AIProvider, SecretApiKey};
use tally_core::ports::ai::{AIError, AIProviderPort, AIResponse};
use tracing::{error, warn};

pub use claude::ClaudeAdapter;
pub use gemini::GeminiAdapter;

/// Maximum attempts when the provider rate limits us
const MAX_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Non-standard status Anthropic uses for "overloaded"
const STATUS_OVERLOADED: u16 = 529;

/// Builds the provider selected by configuration
///
/// An empty `model` selects the provider's default model.
pub fn provider_for(
    provider: AIProvider,
    api_key: &SecretApiKey,
    model: &str,
) -> Arc<dyn AIProviderPort> {
    let model = if model.trim().is_empty() {
        provider.default_model()
    } else {
        model
    };

    match provider {
        AIProvider::Claude => Arc::new(ClaudeAdapter::new(api_key.expose(), model)),
        AIProvider::Gemini => Arc::new(GeminiAdapter::new(api_key.expose(), model)),
    }
}

fn build_http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to default HTTP client");
            Client::new()
        })
}

/// Maps a failure to send a request or read its body
fn send_error(provider: &str, err: &reqwest::Error) -> AIError {
    error!(provider, error = %err, "Request to AI provider failed");

    if err.is_timeout() {
        AIError::TimedOut(err.to_string())
    } else if err.is_connect() {
        AIError::NotConnected(err.to_string())
    } else if err.is_decode() {
        AIError::InvalidResponse(err.to_string())
    } else if err.is_request() || err.is_body() {
        AIError::ConnectionLost(err.to_string())
    } else {
        AIError::RequestFailed(err.to_string())
    }
}

/// Maps a non-success HTTP status
fn status_error(provider: &str, status: StatusCode, body: String) -> AIError {
    match status.as_u16() {
        401 | 403 => {
            error!(provider, "AI provider authentication failed");
            AIError::Unauthorized
        }
        429 => {
            warn!(provider, "AI provider rate limit exceeded");
            AIError::RateLimitExceeded
        }
        503 | STATUS_OVERLOADED => {
            warn!(provider, status = %status, "AI provider overloaded");
            AIError::Overloaded(provider.to_string())
        }
        400 => {
            error!(provider, body = %body, "AI provider rejected the request");
            AIError::InvalidRequest(body)
        }
        _ => {
            error!(provider, status = %status, body = %body, "AI provider error");
            AIError::ProviderError(provider.to_string(), body)
        }
    }
}

/// Runs `attempt`, backing off exponentially while the provider rate limits
async fn with_rate_limit_retry<F, Fut>(mut attempt: F) -> Result<AIResponse, AIError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<AIResponse, AIError>>,
{
    for retry in 0..MAX_RETRIES {
        match attempt().await {
            Err(AIError::RateLimitExceeded) if retry + 1 < MAX_RETRIES => {
                let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(retry));
                warn!(
                    attempt = retry + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    "Rate limited, retrying after backoff"
                );
                tokio::time::sleep(backoff).await;
            }
            result => return result,
        }
    }

    Err(AIError::RateLimitExceeded)
}
