//! The Provider Abstraction.
//!
//! Context assembly needs two things from a model vendor: an exact token
//! count and a summary of older conversation turns. Both may fail; callers
//! own the fallback.

use anyhow::Result;
use async_trait::async_trait;

/// Metadata about a model's capabilities.
#[derive(Debug, Clone)]
pub struct ModelMetadata {
    pub id: String,
    pub context_window: usize,
}

/// The core trait for LLM interactions.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Get the model's metadata (context window, ID, etc).
    fn metadata(&self) -> ModelMetadata;

    /// Exact token count from the provider's counting endpoint.
    async fn count_tokens(&self, text: &str) -> Result<usize>;

    /// Condense conversation text into a short summary.
    async fn summarize(&self, text: &str) -> Result<String>;
}

/// Standing instruction for summarization calls.
pub const SUMMARY_INSTRUCTION: &str = "Summarize the conversation you are given concisely, preserving:\n\
     1. Key facts and decisions\n\
     2. Names, numbers, and technical terms\n\
     3. What the user asked for and any open questions";

/// Conversation text as sent for summarization.
///
/// Input beyond `max_chars` is cut at a char boundary and marked with "...".
pub fn summarization_input(text: &str, max_chars: usize) -> String {
    let body = match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    };

    format!("Conversation:\n{}\n\nProvide a concise summary:", body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_contains_text() {
        let input = summarization_input("User: hi\nAssistant: hello\n", 8000);
        assert!(input.contains("User: hi"));
        assert!(input.starts_with("Conversation:"));
        assert!(SUMMARY_INSTRUCTION.contains("open questions"));
    }

    #[test]
    fn test_input_truncates_long_text() {
        let text = "é".repeat(50);
        let prompt = summarization_input(&text, 10);
        assert!(prompt.contains(&format!("{}...", "é".repeat(10))));
        assert!(!prompt.contains(&"é".repeat(11)));
    }
}
