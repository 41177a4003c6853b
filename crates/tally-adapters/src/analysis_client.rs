//! AI-backed analysis client
//!
//! Implements the AnalysisClient port on top of any AIProviderPort: the image
//! is base64-encoded, combined with the analysis prompt and sent to the
//! provider. Provider failures are translated into transport errors.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tally_core::ports::ai::{AIProviderPort, ImageData};
use tally_core::ports::analysis::{
    AnalysisClient, AnalysisPayload, CapturedImage, TransportError,
};
use tally_core::prompt::AnalysisPrompt;
use tracing::{debug, warn};

/// Analysis client delegating to an AI provider
pub struct AiAnalysisClient<P: AIProviderPort + ?Sized> {
    provider: Arc<P>,
}

impl<P: AIProviderPort + ?Sized> AiAnalysisClient<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }

    fn encode_image(image: &CapturedImage) -> ImageData {
        ImageData {
            base64: BASE64.encode(&image.data),
            media_type: image.media_type.clone(),
        }
    }
}

#[async_trait]
impl<P: AIProviderPort + ?Sized + 'static> AnalysisClient for AiAnalysisClient<P> {
    async fn analyze(
        &self,
        image: &CapturedImage,
        prompt: &AnalysisPrompt,
    ) -> Result<AnalysisPayload, TransportError> {
        debug!(
            provider = self.provider.name(),
            size_bytes = image.len(),
            media_type = %image.media_type,
            "Sending image for analysis"
        );

        let request = prompt.with_image(Self::encode_image(image));

        match self.provider.generate(request).await {
            Ok(response) => {
                debug!(
                    provider = self.provider.name(),
                    text_length = response.text.len(),
                    "Analysis response received"
                );
                Ok(AnalysisPayload::new(response.text))
            }
            Err(e) => {
                let err = TransportError::from(e);
                warn!(
                    provider = self.provider.name(),
                    kind = %err.kind,
                    error = %err.message,
                    "Analysis call failed"
                );
                Err(err)
            }
        }
    }
}

/// Media type for an image file, from its extension
pub fn media_type_for_path(path: &std::path::Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        _ => "image/png",
    }
}
