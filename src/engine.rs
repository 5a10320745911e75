//! Per-turn orchestration.
//!
//! A turn retrieves supporting chunks and resolves conversation history
//! concurrently, under one deadline, then hands both to the assembler.

use crate::assembler::ContextAssembler;
use crate::config::Config;
use crate::deadline::Deadline;
use crate::error::Result;
use crate::history::HistoryBudgetManager;
use crate::llm::{LLMProvider, TokenMeter};
use crate::retrieval::keyword::KeywordRanker;
use crate::retrieval::{ChunkIndex, ChunkSource, SearchBackend};
use crate::store::{HistoryStore, SummaryStore};
use crate::types::{BudgetedContext, Message, RetrievalQuery};
use std::sync::Arc;
use std::time::Duration;

/// Collaborators an engine is wired from.
pub struct EngineParts {
    pub chunks: Arc<dyn ChunkSource>,
    pub history: Arc<dyn HistoryStore>,
    pub summaries: Arc<dyn SummaryStore>,
    pub provider: Option<Arc<dyn LLMProvider>>,
    pub search: Vec<Arc<dyn SearchBackend>>,
}

pub struct ContextEngine {
    index: ChunkIndex,
    budget: HistoryBudgetManager,
    assembler: ContextAssembler,
    history: Arc<dyn HistoryStore>,
    default_limit: usize,
    turn_deadline: Duration,
}

impl ContextEngine {
    pub fn new(config: &Config, parts: EngineParts) -> Self {
        let mut index = ChunkIndex::new(
            parts.chunks,
            KeywordRanker::new(config.retrieval.greeting_limit),
        )
        .with_cache(config.retrieval.cache_ttl(), config.retrieval.cache_max_entries);
        for backend in parts.search {
            index = index.with_backend(backend);
        }

        let (meter, ceiling) = match parts.provider {
            Some(ref provider) => (
                TokenMeter::new(provider.clone()),
                config
                    .turn
                    .max_context_tokens
                    .min(provider.metadata().context_window),
            ),
            None => (TokenMeter::heuristic(), config.turn.max_context_tokens),
        };

        let mut budget = HistoryBudgetManager::new(
            parts.history.clone(),
            parts.summaries,
            meter,
            config.budget.clone(),
        );
        if let Some(provider) = parts.provider {
            budget = budget.with_summarizer(provider);
        }

        Self {
            index,
            budget,
            assembler: ContextAssembler::new(ceiling),
            history: parts.history,
            default_limit: config.retrieval.default_limit,
            turn_deadline: config.turn.deadline(),
        }
    }

    pub fn index(&self) -> &ChunkIndex {
        &self.index
    }

    pub fn budget(&self) -> &HistoryBudgetManager {
        &self.budget
    }

    pub fn ceiling(&self) -> usize {
        self.assembler.ceiling()
    }

    pub fn turn_deadline(&self) -> Deadline {
        Deadline::after(self.turn_deadline)
    }

    /// Build the context for answering `query` in a conversation.
    pub async fn prepare_turn(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        query: &str,
        persona: Option<&str>,
    ) -> Result<BudgetedContext> {
        let deadline = self.turn_deadline();
        self.prepare_turn_until(tenant_id, conversation_id, query, persona, &deadline)
            .await
    }

    pub async fn prepare_turn_until(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        query: &str,
        persona: Option<&str>,
        deadline: &Deadline,
    ) -> Result<BudgetedContext> {
        let retrieval = RetrievalQuery::new(tenant_id, query, self.default_limit);

        let (chunks, history) = tokio::join!(
            self.index.retrieve(&retrieval, deadline),
            self.budget.resolve(tenant_id, conversation_id, deadline)
        );
        let history = history?;

        let context = self
            .assembler
            .compose(tenant_id, conversation_id, persona, chunks, history)?;

        tracing::info!(
            tenant_id,
            conversation_id,
            chunks = context.chunks.len(),
            recent = context.recent_messages.len(),
            summarized = context.was_summarized,
            total_tokens = context.total_tokens,
            "turn context ready"
        );

        Ok(context)
    }

    /// Append a completed exchange to the conversation log.
    pub async fn record_turn(&self, message: &Message) -> Result<()> {
        self.history.append(message).await?;
        tracing::debug!(
            tenant_id = %message.tenant_id,
            conversation_id = %message.conversation_id,
            message_id = %message.id,
            "turn recorded"
        );
        Ok(())
    }
}
