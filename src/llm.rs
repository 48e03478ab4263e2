//! Optional semantic classification layer
//!
//! OpenAI-compatible chat client constrained to the router's five categories
//! via a JSON-only prompt. Any transport failure, timeout or malformed
//! payload surfaces as an error the classifier treats as "layer unavailable",
//! so classification always degrades to the deterministic rules.

use crate::error::{AssistantError, Result};
use crate::store::{SemanticClassifier, SemanticVerdict};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub struct OpenAiClassifier {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl OpenAiClassifier {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }

    fn build_prompt(message: &str) -> String {
        format!(
            r#"You classify user messages for a hotel data assistant.
Pick exactly one category: weather, business, calculation, document, general.

- weather: asks about weather or temperature in a place
- business: asks about hotel KPIs, revenue, occupancy, rates or bookings
- calculation: asks for arithmetic
- document: asks to find or search documents/files
- general: anything else

Message: "{}"

Return ONLY valid JSON in this exact format:
{{"type": "business", "confidence": 0.9, "reasoning": "short explanation"}}"#,
            message
        )
    }
}

#[async_trait]
impl SemanticClassifier for OpenAiClassifier {
    async fn classify_semantic(&self, message: &str) -> Result<SemanticVerdict> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "You are a strict JSON-only classifier."},
                {"role": "user", "content": Self::build_prompt(message)}
            ],
            "temperature": 0.0,
            "response_format": {"type": "json_object"}
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AssistantError::Llm(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AssistantError::Llm(format!(
                "Classifier returned status {}",
                response.status()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AssistantError::Llm(format!("Malformed response: {}", e)))?;

        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .ok_or_else(|| AssistantError::Llm("Empty completion".to_string()))?;

        debug!("Semantic classifier raw verdict: {}", content);

        let verdict: SemanticVerdict = serde_json::from_str(content.trim())
            .map_err(|e| AssistantError::Llm(format!("Failed to parse verdict: {}", e)))?;

        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_embeds_message_and_categories() {
        let prompt = OpenAiClassifier::build_prompt("wie ist das wetter");
        assert!(prompt.contains("wie ist das wetter"));
        for category in ["weather", "business", "calculation", "document", "general"] {
            assert!(prompt.contains(category));
        }
    }

    #[test]
    fn test_verdict_parsing() {
        let verdict: SemanticVerdict = serde_json::from_str(
            r#"{"type": "weather", "confidence": 0.92, "reasoning": "asks about rain"}"#,
        )
        .unwrap();
        assert_eq!(verdict.category, "weather");
        assert!(verdict.reasoning.is_some());
    }
}
