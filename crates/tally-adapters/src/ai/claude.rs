//! Claude API adapter implementation
//!
//! Implements the AIProviderPort trait for Anthropic's Messages API.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tally_core::api_key::AIProvider;
use tally_core::ports::ai::{AIError, AIProviderPort, AIResponse, MultimodalPrompt};
use tracing::debug;

use super::{build_http_client, send_error, status_error, with_rate_limit_retry};

/// Claude API endpoint
const CLAUDE_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// Anthropic API version header
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// The analysis answer is a small JSON object
const MAX_TOKENS: u32 = 1024;

const PROVIDER_NAME: &str = "claude";

/// Claude API adapter
pub struct ClaudeAdapter {
    client: Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl ClaudeAdapter {
    /// Creates a new Claude adapter
    ///
    /// # Example
    /// ```
    /// use tally_adapters::ai::ClaudeAdapter;
    ///
    /// let adapter = ClaudeAdapter::new("sk-ant-...", "claude-3-5-sonnet-20241022");
    /// assert_eq!(adapter.model(), "claude-3-5-sonnet-20241022");
    /// ```
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: build_http_client(),
            api_key: api_key.into(),
            model: model.into(),
            endpoint: CLAUDE_API_URL.to_string(),
        }
    }

    pub fn with_default_model(api_key: impl Into<String>) -> Self {
        Self::new(api_key, AIProvider::Claude.default_model())
    }

    /// Overrides the Messages API URL (proxies, tests)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, prompt: &MultimodalPrompt) -> CreateMessageRequest {
        let mut content: Vec<ContentBlock> = prompt
            .user_message
            .images
            .iter()
            .map(|image| ContentBlock::Image {
                source: ImageSource {
                    source_type: "base64".to_string(),
                    media_type: image.media_type.clone(),
                    data: image.base64.clone(),
                },
            })
            .collect();

        content.push(ContentBlock::Text {
            text: prompt.user_message.text.clone(),
        });

        CreateMessageRequest {
            model: self.model.clone(),
            max_tokens: MAX_TOKENS,
            system: (!prompt.system_message.is_empty()).then(|| prompt.system_message.clone()),
            messages: vec![Message {
                role: "user".to_string(),
                content,
            }],
        }
    }

    async fn send_single_request(
        &self,
        request: &CreateMessageRequest,
    ) -> Result<AIResponse, AIError> {
        debug!(model = %self.model, "Sending request to Claude API");

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request)
            .send()
            .await
            .map_err(|e| send_error(PROVIDER_NAME, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(status_error(PROVIDER_NAME, status, body));
        }

        let body: CreateMessageResponse = response
            .json()
            .await
            .map_err(|e| send_error(PROVIDER_NAME, &e))?;

        let text = body
            .content
            .into_iter()
            .filter_map(|block| match block {
                ResponseContent::Text { text } => Some(text),
                ResponseContent::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        if text.is_empty() {
            return Err(AIError::InvalidResponse(
                "No text content in response".to_string(),
            ));
        }

        debug!(
            stop_reason = ?body.stop_reason,
            text_length = text.len(),
            "Received response from Claude API"
        );

        Ok(AIResponse { text })
    }
}

#[async_trait]
impl AIProviderPort for ClaudeAdapter {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn generate(&self, prompt: MultimodalPrompt) -> Result<AIResponse, AIError> {
        let request = self.build_request(&prompt);
        with_rate_limit_retry(|| self.send_single_request(&request)).await
    }
}

// === Request/Response Types ===

#[derive(Debug, Serialize)]
struct CreateMessageRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    Image { source: ImageSource },
}

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    source_type: String,
    media_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct CreateMessageResponse {
    content: Vec<ResponseContent>,
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseContent {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}
