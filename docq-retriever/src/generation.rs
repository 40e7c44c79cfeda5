//! Hosted generation-service boundary.
//!
//! The pipeline consumes the [`GenerationService`] trait for both text-only
//! calls (abbreviation batches, answer generation) and text+image calls
//! (figure analysis). [`GeminiClient`] is the concrete implementation over
//! the Gemini `generateContent` REST endpoint. No retry happens at this
//! layer; each caller applies its own degradation policy.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Environment variable holding the API key.
pub const API_KEY_VAR: &str = "GEMINI_API_KEY";

/// Errors from the generation-service boundary.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// The API key is missing or empty. Fatal configuration error at first
    /// use of the service.
    #[error("{API_KEY_VAR} is not set; the generation service is unavailable")]
    MissingApiKey,

    /// Transport-level or HTTP-status failure.
    #[error("generation request failed: {source}")]
    Request {
        #[from]
        source: reqwest::Error,
    },

    /// The service answered with no candidates.
    #[error("generation service returned no candidates")]
    EmptyResponse,
}

/// Free-text completion service, with and without an image attachment.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Generate text for a prompt.
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;

    /// Generate text for a prompt plus one PNG image.
    async fn generate_with_image(
        &self,
        prompt: &str,
        image_png: &[u8],
    ) -> Result<String, GenerationError>;
}

/// Client for the Gemini `generateContent` endpoint.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GeminiClient {
    /// Default generation model.
    pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-lite";

    /// Build a client from `GEMINI_API_KEY`. Fails with
    /// [`GenerationError::MissingApiKey`] when the variable is absent or
    /// empty, surfaced before any call is attempted.
    pub fn from_env() -> Result<Self, GenerationError> {
        let api_key = std::env::var(API_KEY_VAR)
            .ok()
            .filter(|key| !key.is_empty())
            .ok_or(GenerationError::MissingApiKey)?;
        Self::new(api_key, Self::DEFAULT_MODEL.to_string())
    }

    /// Build a client with an explicit key and model name.
    pub fn new(api_key: String, model: String) -> Result<Self, GenerationError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            http,
            api_key,
            model,
        })
    }

    async fn call(&self, parts: Vec<serde_json::Value>) -> Result<String, GenerationError> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            self.model
        );
        let body = json!({ "contents": [{ "parts": parts }] });

        tracing::debug!("Calling generation service model {}", self.model);
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let parsed: GenerateContentResponse = response.json().await?;
        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or(GenerationError::EmptyResponse)?;

        // Join all text parts of the first candidate; a candidate with no
        // text parts yields the empty string, which callers pass through.
        let text = candidate
            .content
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        Ok(text)
    }
}

#[async_trait]
impl GenerationService for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        self.call(vec![json!({ "text": prompt })]).await
    }

    async fn generate_with_image(
        &self,
        prompt: &str,
        image_png: &[u8],
    ) -> Result<String, GenerationError> {
        self.call(vec![
            json!({ "text": prompt }),
            json!({
                "inline_data": {
                    "mime_type": "image/png",
                    "data": BASE64.encode(image_png),
                }
            }),
        ])
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_text_parts_are_joined() {
        let raw = r#"{
            "candidates": [{
                "content": { "parts": [{ "text": "Hello " }, { "text": "world" }] }
            }]
        }"#;
        let parsed: GenerateContentResponse = serde_json::from_str(raw).unwrap();
        let candidate = parsed.candidates.into_iter().next().unwrap();
        let text: String = candidate
            .content
            .unwrap()
            .parts
            .into_iter()
            .filter_map(|p| p.text)
            .collect();
        assert_eq!(text, "Hello world");
    }

    #[test]
    fn response_without_candidates_parses_to_empty_list() {
        let parsed: GenerateContentResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.candidates.is_empty());
    }

    #[test]
    fn missing_key_is_a_configuration_error() {
        // Temporarily mask the variable if the host environment sets it.
        let saved = std::env::var(API_KEY_VAR).ok();
        unsafe { std::env::remove_var(API_KEY_VAR) };

        let result = GeminiClient::from_env();
        assert!(matches!(result, Err(GenerationError::MissingApiKey)));

        if let Some(value) = saved {
            unsafe { std::env::set_var(API_KEY_VAR, value) };
        }
    }
}
