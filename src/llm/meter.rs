//! Token metering.
//!
//! Exact counts come from the provider; when it is missing, failing or out
//! of time, the count falls back to the 4-characters-per-token heuristic.
//! The fallback is decided per call, never latched.

use super::provider::LLMProvider;
use crate::deadline::Deadline;
use std::sync::Arc;

/// Cheap estimate: one token per four bytes of text.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

#[derive(Clone)]
pub struct TokenMeter {
    provider: Option<Arc<dyn LLMProvider>>,
}

impl TokenMeter {
    /// Meter backed by a provider's counting endpoint.
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider: Some(provider),
        }
    }

    /// Meter that only ever estimates.
    pub fn heuristic() -> Self {
        Self { provider: None }
    }

    pub fn is_exact(&self) -> bool {
        self.provider.is_some()
    }

    /// Count tokens, trying the exact endpoint first.
    pub async fn count(&self, text: &str, deadline: &Deadline) -> usize {
        if text.is_empty() {
            return 0;
        }
        let Some(ref provider) = self.provider else {
            return estimate_tokens(text);
        };

        match deadline.run("token counter", provider.count_tokens(text)).await {
            Ok(tokens) => tokens,
            Err(e) => {
                let estimate = estimate_tokens(text);
                tracing::warn!(error = %e, estimate, "exact token count failed, using estimate");
                estimate
            }
        }
    }
}
