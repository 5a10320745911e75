//! Error taxonomy for context assembly.
//!
//! Backend failures are recovered where they happen; only `BudgetExceeded`
//! and storage failures ever reach the caller of a turn.

use thiserror::Error;

/// Result type for context assembly operations.
pub type Result<T> = std::result::Result<T, ContextError>;

#[derive(Debug, Error)]
pub enum ContextError {
    /// Assembled context is still larger than the hard ceiling.
    #[error(
        "context for conversation {conversation_id} (tenant {tenant_id}) needs {total_tokens} tokens, ceiling is {ceiling}"
    )]
    BudgetExceeded {
        tenant_id: String,
        conversation_id: String,
        total_tokens: usize,
        ceiling: usize,
    },

    /// Search, counting or summarization service failed or timed out.
    #[error("{backend} unavailable: {reason}")]
    BackendUnavailable { backend: &'static str, reason: String },

    /// Durable store or index failure.
    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl ContextError {
    pub fn backend(backend: &'static str, reason: impl ToString) -> Self {
        Self::BackendUnavailable {
            backend,
            reason: reason.to_string(),
        }
    }

    pub fn is_budget_exceeded(&self) -> bool {
        matches!(self, Self::BudgetExceeded { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_exceeded_message_has_counts() {
        let err = ContextError::BudgetExceeded {
            tenant_id: "acme".to_string(),
            conversation_id: "conv-1".to_string(),
            total_tokens: 40_000,
            ceiling: 32_000,
        };
        let msg = err.to_string();
        assert!(msg.contains("conv-1"));
        assert!(msg.contains("40000"));
        assert!(msg.contains("32000"));
        assert!(err.is_budget_exceeded());
    }

    #[test]
    fn test_storage_from_anyhow() {
        let err: ContextError = anyhow::anyhow!("disk full").into();
        assert!(matches!(err, ContextError::Storage(_)));
        assert!(!err.is_budget_exceeded());
    }
}
