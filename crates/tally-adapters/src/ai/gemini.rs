//! Gemini API adapter implementation
//!
//! Implements the AIProviderPort trait for Google's Gemini generateContent API.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tally_core::api_key::AIProvider;
use tally_core::ports::ai::{AIError, AIProviderPort, AIResponse, MultimodalPrompt};
use tracing::debug;

use super::{build_http_client, send_error, status_error, with_rate_limit_retry};

/// Gemini API base URL
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

const MAX_OUTPUT_TOKENS: u32 = 1024;

const PROVIDER_NAME: &str = "gemini";

/// Gemini API adapter
pub struct GeminiAdapter {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiAdapter {
    /// Creates a new Gemini adapter
    ///
    /// # Example
    /// ```
    /// use tally_adapters::ai::GeminiAdapter;
    ///
    /// let adapter = GeminiAdapter::new("AIza...", "gemini-2.0-flash");
    /// assert_eq!(adapter.model(), "gemini-2.0-flash");
    /// ```
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: build_http_client(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: GEMINI_API_BASE.to_string(),
        }
    }

    pub fn with_default_model(api_key: impl Into<String>) -> Self {
        Self::new(api_key, AIProvider::Gemini.default_model())
    }

    /// Overrides the models base URL (proxies, tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// The key travels in a header so it never shows up in logged URLs
    fn api_url(&self) -> String {
        format!("{}/{}:generateContent", self.base_url, self.model)
    }

    fn build_request(&self, prompt: &MultimodalPrompt) -> GenerateContentRequest {
        let mut parts: Vec<Part> = prompt
            .user_message
            .images
            .iter()
            .map(|image| Part::InlineData {
                inline_data: InlineData {
                    mime_type: image.media_type.clone(),
                    data: image.base64.clone(),
                },
            })
            .collect();

        parts.push(Part::Text {
            text: prompt.user_message.text.clone(),
        });

        let system_instruction = (!prompt.system_message.is_empty()).then(|| Content {
            role: None,
            parts: vec![Part::Text {
                text: prompt.system_message.clone(),
            }],
        });

        GenerateContentRequest {
            system_instruction,
            contents: vec![Content {
                role: Some("user".to_string()),
                parts,
            }],
            generation_config: GenerationConfig {
                max_output_tokens: Some(MAX_OUTPUT_TOKENS),
                response_mime_type: Some("application/json".to_string()),
            },
        }
    }

    async fn send_single_request(
        &self,
        request: &GenerateContentRequest,
    ) -> Result<AIResponse, AIError> {
        debug!(model = %self.model, "Sending request to Gemini API");

        let response = self
            .client
            .post(self.api_url())
            .header("x-goog-api-key", &self.api_key)
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

        let body: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| send_error(PROVIDER_NAME, &e))?;

        let text = body
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|content| content.parts)
            .filter_map(|part| part.text)
            .collect::<Vec<_>>()
            .join("\n");

        if text.is_empty() {
            return Err(AIError::InvalidResponse(
                "No text content in response".to_string(),
            ));
        }

        debug!(text_length = text.len(), "Received response from Gemini API");

        Ok(AIResponse { text })
    }
}

#[async_trait]
impl AIProviderPort for GeminiAdapter {
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
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::test_server::{serve_once, Reply};
    use tally_core::ports::ai::{ImageData, UserMessage};

    fn create_test_prompt() -> MultimodalPrompt {
        MultimodalPrompt {
            system_message: "Respond with JSON.".to_string(),
            user_message: UserMessage {
                text: "Estimate the calories.".to_string(),
                images: vec![ImageData {
                    base64: "aGVsbG8gd29ybGQ=".to_string(),
                    media_type: "image/png".to_string(),
                }],
            },
        }
    }

    #[test]
    fn test_gemini_adapter_with_default_model() {
        let adapter = GeminiAdapter::with_default_model("test-key");
        assert_eq!(adapter.model(), AIProvider::Gemini.default_model());
    }

    #[test]
    fn test_api_url_keeps_key_out_of_url() {
        let adapter = GeminiAdapter::new("test-api-key", "gemini-2.0-flash");
        let url = adapter.api_url();

        assert!(url.contains("generativelanguage.googleapis.com"));
        assert!(url.ends_with("gemini-2.0-flash:generateContent"));
        assert!(!url.contains("test-api-key"));
    }

    #[test]
    fn test_build_request_structure() {
        let adapter = GeminiAdapter::new("test-key", "gemini-2.0-flash");
        let request = adapter.build_request(&create_test_prompt());

        assert!(request.system_instruction.is_some());
        assert_eq!(request.contents.len(), 1);
        assert_eq!(request.contents[0].role.as_deref(), Some("user"));
        // Image + instruction
        assert_eq!(request.contents[0].parts.len(), 2);
    }

    #[test]
    fn test_request_serialization() {
        let adapter = GeminiAdapter::new("test-key", "gemini-2.0-flash");
        let json = serde_json::to_string(&adapter.build_request(&create_test_prompt()))
            .expect("Failed to serialize");

        assert!(json.contains("systemInstruction"));
        assert!(json.contains("inlineData"));
        assert!(json.contains("mimeType"));
        assert!(json.contains("\"responseMimeType\":\"application/json\""));
    }

    #[test]
    fn test_response_without_candidates() {
        let response: GenerateContentResponse =
            serde_json::from_str(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#).unwrap();
        assert!(response.candidates.is_empty());
    }

    #[tokio::test]
    async fn test_generate_against_local_server() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"{\"noContent\":true}"}],"role":"model"},"finishReason":"STOP"}]}"#;
        let (url, server) = serve_once(Reply::Json(200, body)).await;

        let adapter = GeminiAdapter::new("test-key", "gemini-test").with_base_url(url);
        let response = adapter.generate(create_test_prompt()).await.unwrap();
        assert_eq!(response.text, r#"{"noContent":true}"#);

        let request = server.await.unwrap();
        assert!(request.contains("/gemini-test:generateContent"));
        assert!(request.contains("x-goog-api-key: test-key"));
    }

    #[tokio::test]
    async fn test_empty_candidates_is_invalid_response() {
        let (url, _server) = serve_once(Reply::Json(200, r#"{"candidates":[]}"#)).await;

        let adapter = GeminiAdapter::new("test-key", "gemini-test").with_base_url(url);
        let result = adapter.generate(create_test_prompt()).await;
        assert!(matches!(result, Err(AIError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_forbidden_is_unauthorized() {
        let (url, _server) = serve_once(Reply::Json(403, r#"{"error":{}}"#)).await;

        let adapter = GeminiAdapter::new("test-key", "gemini-test").with_base_url(url);
        let result = adapter.generate(create_test_prompt()).await;
        assert!(matches!(result, Err(AIError::Unauthorized)));
    }

    #[tokio::test]
    #[ignore = "Requires GOOGLE_AI_API_KEY environment variable"]
    async fn test_gemini_api_integration() {
        let api_key = std::env::var("GOOGLE_AI_API_KEY").expect("GOOGLE_AI_API_KEY not set");
        let adapter = GeminiAdapter::with_default_model(api_key);

        let prompt = MultimodalPrompt {
            system_message: "Respond with a JSON object {\"answer\": number}.".to_string(),
            user_message: UserMessage {
                text: "What is 2 + 2?".to_string(),
                images: vec![],
            },
        };

        let response = adapter.generate(prompt).await.expect("API call failed");
        assert!(!response.text.is_empty());
    }
}
