//! Final context composition.

use crate::error::{ContextError, Result};
use crate::llm::estimate_tokens;
use crate::types::{BudgetedContext, ContentChunk, HistoryResolution};

/// Concatenates the pieces of a turn's context in presentation order and
/// refuses, rather than truncates, anything over the hard ceiling.
#[derive(Debug, Clone, Copy)]
pub struct ContextAssembler {
    ceiling: usize,
}

impl ContextAssembler {
    pub fn new(ceiling: usize) -> Self {
        Self { ceiling }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn compose(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        persona: Option<&str>,
        chunks: Vec<ContentChunk>,
        history: HistoryResolution,
    ) -> Result<BudgetedContext> {
        let persona_tokens = persona.map(estimate_tokens).unwrap_or(0);
        let chunk_tokens: usize = chunks.iter().map(|c| estimate_tokens(&c.text)).sum();
        let total_tokens = persona_tokens + chunk_tokens + history.tokens_after;

        if total_tokens > self.ceiling {
            tracing::error!(
                tenant_id,
                conversation_id,
                total_tokens,
                ceiling = self.ceiling,
                persona_tokens,
                chunk_tokens,
                history_tokens = history.tokens_after,
                "assembled context exceeds ceiling"
            );
            return Err(ContextError::BudgetExceeded {
                tenant_id: tenant_id.to_string(),
                conversation_id: conversation_id.to_string(),
                total_tokens,
                ceiling: self.ceiling,
            });
        }

        Ok(BudgetedContext {
            persona: persona.map(str::to_string),
            chunks,
            summary: history.summary,
            recent_messages: history.recent,
            tokens_before: history.tokens_before,
            tokens_after: history.tokens_after,
            was_summarized: history.was_summarized,
            refresh_count: history.refresh_count,
            total_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{conversation, doc_chunk};
    use crate::types::ContextSection;

    fn history(summary: Option<&str>, n: usize) -> HistoryResolution {
        HistoryResolution {
            recent: conversation("acme", "conv-1", n, 10),
            summary: summary.map(str::to_string),
            tokens_before: 500,
            tokens_after: 100,
            was_summarized: summary.is_some(),
            refresh_count: 1,
        }
    }

    #[test]
    fn test_sections_in_order() {
        let assembler = ContextAssembler::new(32_000);
        let ctx = assembler
            .compose(
                "acme",
                "conv-1",
                Some("You are Acme's assistant."),
                vec![doc_chunk("c1", 0, "first"), doc_chunk("c2", 1, "second")],
                history(Some("earlier: asked about pricing"), 2),
            )
            .unwrap();

        let sections = ctx.sections();
        assert_eq!(sections.len(), 6);
        assert!(matches!(sections[0], ContextSection::Persona(_)));
        assert!(matches!(sections[1], ContextSection::Chunk(c) if c.id == "c1"));
        assert!(matches!(sections[2], ContextSection::Chunk(c) if c.id == "c2"));
        assert!(matches!(sections[3], ContextSection::Summary(_)));
        assert!(matches!(sections[4], ContextSection::Turn(m) if m.user_text.starts_with("q000")));
        assert!(matches!(sections[5], ContextSection::Turn(m) if m.user_text.starts_with("q001")));
    }

    #[test]
    fn test_optional_parts_omitted() {
        let ctx = ContextAssembler::new(32_000)
            .compose("acme", "conv-1", None, Vec::new(), history(None, 1))
            .unwrap();
        let sections = ctx.sections();
        assert_eq!(sections.len(), 1);
        assert!(matches!(sections[0], ContextSection::Turn(_)));
    }

    #[test]
    fn test_total_counts_every_part() {
        let persona = "p".repeat(400);
        let ctx = ContextAssembler::new(32_000)
            .compose(
                "acme",
                "conv-1",
                Some(&persona),
                vec![doc_chunk("c1", 0, &"x".repeat(800))],
                history(None, 1),
            )
            .unwrap();
        assert_eq!(ctx.total_tokens, 100 + 200 + 100);
        assert_eq!(ctx.tokens_before, 500);
        assert_eq!(ctx.refresh_count, 1);
    }

    #[test]
    fn test_over_ceiling_fails_loudly() {
        let err = ContextAssembler::new(150)
            .compose(
                "acme",
                "conv-9",
                None,
                vec![doc_chunk("c1", 0, &"x".repeat(400))],
                history(None, 1),
            )
            .unwrap_err();

        match err {
            ContextError::BudgetExceeded {
                conversation_id,
                total_tokens,
                ceiling,
                ..
            } => {
                assert_eq!(conversation_id, "conv-9");
                assert_eq!(total_tokens, 200);
                assert_eq!(ceiling, 150);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
