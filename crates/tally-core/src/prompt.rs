//! Prompt builder for analysis requests
//!
//! Builds the text half of an analysis request. The image half is attached
//! by the [`AnalysisClient`](crate::ports::AnalysisClient) implementation.

use crate::ports::ai::{AIError, ImageData, MultimodalPrompt, UserMessage};

/// Default instruction describing what to total up in the image
pub const DEFAULT_INSTRUCTION: &str =
    "Identify the food in this photo and estimate its total calories.";

/// Text portion of an analysis request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisPrompt {
    /// System message fixing the response format
    pub system_message: String,
    /// User-facing instruction
    pub user_text: String,
}

impl AnalysisPrompt {
    /// Combines this prompt with an encoded image into a provider request
    pub fn with_image(&self, image: ImageData) -> MultimodalPrompt {
        MultimodalPrompt {
            system_message: self.system_message.clone(),
            user_message: UserMessage {
                text: self.user_text.clone(),
                images: vec![image],
            },
        }
    }
}

/// Builder for analysis prompts
pub struct PromptBuilder;

impl PromptBuilder {
    /// Builds an analysis prompt from an instruction
    ///
    /// # Errors
    /// Returns `AIError::InvalidRequest` if the instruction is empty
    ///
    /// # Example
    /// ```
    /// use tally_core::prompt::PromptBuilder;
    ///
    /// let prompt = PromptBuilder::build_analysis_prompt("Estimate the calories")
    ///     .expect("Failed to build prompt");
    ///
    /// assert!(prompt.system_message.contains("noContent"));
    /// ```
    pub fn build_analysis_prompt(instruction: &str) -> Result<AnalysisPrompt, AIError> {
        let trimmed = instruction.trim();
        if trimmed.is_empty() {
            return Err(AIError::InvalidRequest(
                "Instruction cannot be empty".to_string(),
            ));
        }

        Ok(AnalysisPrompt {
            system_message: Self::build_system_message(),
            user_text: Self::build_user_text(trimmed),
        })
    }

    fn build_system_message() -> String {
        r#"You analyze a single photo and report one numeric total for what it shows.

Respond ONLY with valid JSON in this exact format:
{
  "noContent": false,
  "totalAmount": 0,
  "confidence": 0,
  "description": "short description"
}

Rules:
- Set "noContent" to true when nothing relevant is recognizable in the photo.
- "totalAmount" is a number, "confidence" an integer from 0 to 10.
- Keep "description" under 80 characters.
- Do not include any text before or after the JSON."#
            .to_string()
    }

    fn build_user_text(instruction: &str) -> String {
        format!("{}\n\nAnswer with the JSON object only.", instruction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_prompt_with_valid_instruction() {
        let prompt = PromptBuilder::build_analysis_prompt(DEFAULT_INSTRUCTION).unwrap();
        assert!(prompt.user_text.starts_with(DEFAULT_INSTRUCTION));
        assert!(prompt.system_message.contains("totalAmount"));
        assert!(prompt.system_message.contains("noContent"));
    }

    #[test]
    fn test_build_prompt_trims_instruction() {
        let prompt = PromptBuilder::build_analysis_prompt("  count the coins \n").unwrap();
        assert!(prompt.user_text.starts_with("count the coins\n"));
    }

    #[test]
    fn test_build_prompt_rejects_empty_instruction() {
        let result = PromptBuilder::build_analysis_prompt("   ");
        assert!(matches!(result, Err(AIError::InvalidRequest(_))));
    }

    #[test]
    fn test_with_image_attaches_single_image() {
        let prompt = PromptBuilder::build_analysis_prompt(DEFAULT_INSTRUCTION).unwrap();
        let request = prompt.with_image(ImageData {
            base64: "aGVsbG8=".to_string(),
            media_type: "image/jpeg".to_string(),
        });

        assert_eq!(request.system_message, prompt.system_message);
        assert_eq!(request.user_message.text, prompt.user_text);
        assert_eq!(request.user_message.images.len(), 1);
        assert_eq!(request.user_message.images[0].media_type, "image/jpeg");
    }
}
