//! Gemini API Provider.
//!
//! Implements the `LLMProvider` trait against the Gemini REST API:
//! `countTokens` for exact counts, `generateContent` for summaries.

use super::provider::{summarization_input, LLMProvider, ModelMetadata, SUMMARY_INSTRUCTION};
use crate::config::ProviderConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Gemini Provider configuration and state.
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    summary_input_chars: usize,
}

impl GeminiProvider {
    pub fn new(api_key: String, model: String) -> Self {
        let defaults = ProviderConfig::default();
        Self {
            client: Client::new(),
            api_key,
            model,
            base_url: defaults.base_url,
            summary_input_chars: defaults.summary_input_chars,
        }
    }

    /// Build a provider from config, reading the key from the environment.
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            client: Client::new(),
            api_key: config.api_key()?,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            summary_input_chars: config.summary_input_chars,
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, self.model, method)
    }

    /// Send a single-turn generateContent request.
    async fn generate(&self, instruction: Option<&str>, prompt: &str) -> Result<Generation> {
        let request = GenerateRequest::new(instruction, prompt, 0.3);

        let response = self.client
            .post(self.endpoint("generateContent"))
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Gemini")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Gemini API error ({}): {}", status, error_text));
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .context("Failed to parse Gemini response")?;

        generated.into_generation()
    }
}

#[async_trait]
impl LLMProvider for GeminiProvider {
    fn metadata(&self) -> ModelMetadata {
        let window = match self.model.as_str() {
            "gemini-1.5-pro" => 2_097_152,
            "gemini-1.5-flash" | "gemini-2.0-flash" => 1_048_576,
            "gemini-1.0-pro" | "gemini-pro" => 32_760,
            _ => 32_768,
        };

        ModelMetadata {
            id: self.model.clone(),
            context_window: window,
        }
    }

    async fn count_tokens(&self, text: &str) -> Result<usize> {
        let request = CountRequest {
            contents: vec![Content::text("user", text)],
        };

        let response = self.client
            .post(self.endpoint("countTokens"))
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send countTokens request to Gemini")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Gemini countTokens error ({}): {}", status, error_text));
        }

        let counted: CountResponse = response
            .json()
            .await
            .context("Failed to parse Gemini countTokens response")?;

        Ok(counted.total_tokens)
    }

    async fn summarize(&self, text: &str) -> Result<String> {
        let input = summarization_input(text, self.summary_input_chars);
        let response = self.generate(Some(SUMMARY_INSTRUCTION), &input).await?;

        let summary = response.text.trim().to_string();
        if summary.is_empty() {
            return Err(anyhow::anyhow!("Gemini returned an empty summary"));
        }
        tracing::debug!(
            model = %self.model,
            prompt_tokens = response.usage.prompt_token_count,
            output_tokens = response.usage.candidates_token_count,
            total_tokens = response.usage.total_token_count,
            "summary generated"
        );
        Ok(summary)
    }
}

// -----------------------------------------------------------------------------
// Gemini DTOs (Data Transfer Objects)
// -----------------------------------------------------------------------------

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

impl Content {
    fn text(role: &str, text: &str) -> Self {
        Self {
            role: Some(role.to_string()),
            parts: vec![Part { text: text.to_string() }],
        }
    }

    /// System instructions carry no role.
    fn instruction(text: &str) -> Self {
        Self {
            role: None,
            parts: vec![Part { text: text.to_string() }],
        }
    }
}

#[derive(Serialize)]
struct CountRequest {
    contents: Vec<Content>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CountResponse {
    total_tokens: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

impl GenerateRequest {
    fn new(instruction: Option<&str>, prompt: &str, temperature: f32) -> Self {
        Self {
            contents: vec![Content::text("user", prompt)],
            system_instruction: instruction.map(Content::instruction),
            generation_config: GenerationConfig { temperature },
        }
    }
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

/// Generated text with the token usage Gemini reported for it.
struct Generation {
    text: String,
    usage: UsageMetadata,
}

impl GenerateResponse {
    fn into_generation(self) -> Result<Generation> {
        let candidate = self.candidates.into_iter().next().context("No candidates returned from Gemini")?;
        let text = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect::<String>())
            .unwrap_or_default();

        Ok(Generation {
            text,
            usage: self.usage_metadata.unwrap_or_default(),
        })
    }
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: usize,
    #[serde(default)]
    candidates_token_count: usize,
    #[serde(default)]
    total_token_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_carries_summary_instruction() {
        let input = summarization_input("User: hi\nAssistant: hello\n", 8000);
        let request = GenerateRequest::new(Some(SUMMARY_INSTRUCTION), &input, 0.3);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"].as_array().unwrap().len(), 1);
        assert_eq!(json["contents"][0]["role"], "user");
        assert!(json["contents"][0]["parts"][0]["text"].as_str().unwrap().contains("User: hi"));
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], SUMMARY_INSTRUCTION);
        assert!(json["systemInstruction"].get("role").is_none());
        assert!((json["generationConfig"]["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_request_without_instruction_omits_field() {
        let json = serde_json::to_value(GenerateRequest::new(None, "hi", 0.3)).unwrap();
        assert!(json.get("systemInstruction").is_none());
    }

    #[test]
    fn test_response_joins_parts() {
        let raw = r#"{
            "candidates": [{"content": {"parts": [{"text": "Customer "}, {"text": "asked about pricing."}]}}],
            "usageMetadata": {"promptTokenCount": 120, "candidatesTokenCount": 8, "totalTokenCount": 128}
        }"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        let generation = parsed.into_generation().unwrap();
        assert_eq!(generation.text, "Customer asked about pricing.");
        assert_eq!(generation.usage.prompt_token_count, 120);
        assert_eq!(generation.usage.total_token_count, 128);
    }

    #[test]
    fn test_response_without_candidates_is_error() {
        let parsed: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.into_generation().is_err());
    }

    #[test]
    fn test_count_response_parses() {
        let parsed: CountResponse = serde_json::from_str(r#"{"totalTokens": 57}"#).unwrap();
        assert_eq!(parsed.total_tokens, 57);
    }

    #[test]
    fn test_metadata_context_window() {
        let provider = GeminiProvider::new("key".to_string(), "gemini-1.5-flash".to_string());
        assert_eq!(provider.metadata().context_window, 1_048_576);
        let provider = GeminiProvider::new("key".to_string(), "custom-model".to_string());
        assert_eq!(provider.metadata().context_window, 32_768);
    }
}
