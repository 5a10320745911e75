//! LLM Layer
//!
//! Everything that talks to a language model on behalf of context assembly:
//! - Provider abstraction (token counting, summarization)
//! - Gemini REST provider
//! - Token metering with heuristic fallback

pub mod provider;
pub mod meter;
pub mod gemini;

// Re-export key types
pub use provider::{LLMProvider, ModelMetadata, summarization_input, SUMMARY_INSTRUCTION};
pub use meter::{estimate_tokens, TokenMeter};
pub use gemini::GeminiProvider;
