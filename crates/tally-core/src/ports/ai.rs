//! AI Provider port definition

use async_trait::async_trait;
use thiserror::Error;

use super::analysis::{TransportError, TransportErrorKind};

/// Image data for AI analysis
#[derive(Debug, Clone)]
pub struct ImageData {
    /// Base64 encoded image data
    pub base64: String,
    /// MIME type (e.g., "image/png")
    pub media_type: String,
}

/// Multimodal prompt for AI providers
#[derive(Debug, Clone)]
pub struct MultimodalPrompt {
    /// System message for the AI
    pub system_message: String,
    /// User message with text and images
    pub user_message: UserMessage,
}

/// User message containing text and optional images
#[derive(Debug, Clone)]
pub struct UserMessage {
    /// Text content
    pub text: String,
    /// List of images to include
    pub images: Vec<ImageData>,
}

/// Response from an AI provider
#[derive(Debug, Clone)]
pub struct AIResponse {
    /// Generated text response
    pub text: String,
}

/// Errors that can occur during AI operations
#[derive(Debug, Error)]
pub enum AIError {
    /// API key is missing or invalid
    #[error("Unauthorized: API key is missing or invalid. Please set the appropriate environment variable (ANTHROPIC_API_KEY or GOOGLE_AI_API_KEY)")]
    Unauthorized,

    /// Rate limit exceeded
    #[error("Rate limit exceeded. Please wait and try again.")]
    RateLimitExceeded,

    /// Provider reported it is overloaded
    #[error("Provider '{0}' is overloaded")]
    Overloaded(String),

    /// Invalid request (e.g., unsupported image format)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Provider-specific error
    #[error("Provider '{0}' error: {1}")]
    ProviderError(String, String),

    /// No connection to the provider could be established
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// The connection dropped while the request was in flight
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The request did not complete within the client timeout
    #[error("Request timed out: {0}")]
    TimedOut(String),

    /// Request failed
    #[error("API request failed: {0}")]
    RequestFailed(String),

    /// Invalid response from API
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),
}

impl From<AIError> for TransportError {
    fn from(err: AIError) -> Self {
        let kind = match &err {
            AIError::Unauthorized => TransportErrorKind::Unauthorized,
            AIError::RateLimitExceeded | AIError::Overloaded(_) => TransportErrorKind::Overloaded,
            AIError::InvalidRequest(_) => TransportErrorKind::Rejected,
            AIError::ProviderError(_, _) | AIError::RequestFailed(_) => TransportErrorKind::Provider,
            AIError::NotConnected(_) => TransportErrorKind::NotConnected,
            AIError::ConnectionLost(_) => TransportErrorKind::ConnectionLost,
            AIError::TimedOut(_) => TransportErrorKind::TimedOut,
            AIError::InvalidResponse(_) => TransportErrorKind::InvalidResponse,
        };
        TransportError::new(kind, err.to_string())
    }
}

/// Port for AI provider operations
#[async_trait]
pub trait AIProviderPort: Send + Sync {
    /// Short provider identifier used in logs (e.g., "claude")
    fn name(&self) -> &str;

    /// Generate a response for the given prompt
    async fn generate(&self, prompt: MultimodalPrompt) -> Result<AIResponse, AIError>;
}
