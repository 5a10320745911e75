//! Conversation history under a token budget.
//!
//! When a conversation outgrows the budget, the newest messages are kept
//! verbatim and everything older is folded into a rolling summary. The
//! summary is reused for a fixed number of turns before it is regenerated,
//! which keeps summarization calls to roughly one per refresh cycle.

use crate::config::BudgetConfig;
use crate::deadline::Deadline;
use crate::error::{ContextError, Result};
use crate::llm::{estimate_tokens, LLMProvider, TokenMeter};
use crate::store::{HistoryStore, SummaryStore};
use crate::types::{render_history, ConversationSummary, HistoryResolution, Message};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Attempts at a summary write before serving what was last read.
const MAX_CAS_ATTEMPTS: usize = 3;

type ConversationKey = (String, String);

/// Summary text chosen for one resolve, and the record's refresh count.
#[derive(Debug, Default)]
struct SummaryOutcome {
    text: Option<String>,
    refresh_count: u32,
}

pub struct HistoryBudgetManager {
    history: Arc<dyn HistoryStore>,
    summaries: Arc<dyn SummaryStore>,
    meter: TokenMeter,
    summarizer: Option<Arc<dyn LLMProvider>>,
    config: BudgetConfig,
    locks: Mutex<HashMap<ConversationKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl HistoryBudgetManager {
    pub fn new(
        history: Arc<dyn HistoryStore>,
        summaries: Arc<dyn SummaryStore>,
        meter: TokenMeter,
        config: BudgetConfig,
    ) -> Self {
        Self {
            history,
            summaries,
            meter,
            summarizer: None,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn LLMProvider>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// Decide which messages go verbatim and what summary covers the rest.
    pub async fn resolve(&self, tenant_id: &str, conversation_id: &str, deadline: &Deadline) -> Result<HistoryResolution> {
        let messages = self
            .history
            .load_recent(tenant_id, conversation_id, self.config.history_load_cap)
            .await?;

        let tokens_before = self.meter.count(&render_history(&messages), deadline).await;

        if tokens_before <= self.config.max_history_tokens {
            return Ok(verbatim(messages, tokens_before));
        }

        if messages.len() <= self.config.recent_messages_count {
            tracing::info!(
                tenant_id,
                conversation_id,
                messages = messages.len(),
                tokens = tokens_before,
                budget = self.config.max_history_tokens,
                "history over budget but too short to compress"
            );
            return Ok(verbatim(messages, tokens_before));
        }

        let mut older = messages;
        let recent = older.split_off(older.len() - self.config.recent_messages_count);

        let outcome = self.summary_for(tenant_id, conversation_id, &older, deadline).await?;

        let recent_tokens = self.meter.count(&render_history(&recent), deadline).await;
        let summary_tokens = outcome.text.as_deref().map(estimate_tokens).unwrap_or(0);
        let tokens_after = recent_tokens + summary_tokens;

        tracing::debug!(
            tenant_id,
            conversation_id,
            tokens_before,
            tokens_after,
            summarized = older.len(),
            refresh_count = outcome.refresh_count,
            "history compressed"
        );

        Ok(HistoryResolution {
            recent,
            was_summarized: outcome.text.is_some(),
            summary: outcome.text,
            tokens_before,
            tokens_after,
            refresh_count: outcome.refresh_count,
        })
    }

    fn lock_for(&self, tenant_id: &str, conversation_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Drop locks nobody is holding or waiting on
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry((tenant_id.to_string(), conversation_id.to_string()))
            .or_default()
            .clone()
    }

    /// Reuse, create or regenerate the rolling summary for `older`.
    async fn summary_for(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        older: &[Message],
        deadline: &Deadline,
    ) -> Result<SummaryOutcome> {
        let lock = self.lock_for(tenant_id, conversation_id);
        let _guard = lock.lock().await;

        let reuse_limit = self.config.summary_refresh_cycle.saturating_sub(1);
        let mut last_seen: Option<ConversationSummary> = None;

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let stored = self.summaries.load(tenant_id, conversation_id).await?;

            let (record, expected) = match stored {
                None => match self.summarize(older, deadline).await {
                    Ok(text) => (
                        new_record(tenant_id, conversation_id, text, older, 0, 1),
                        None,
                    ),
                    Err(e) => {
                        tracing::warn!(tenant_id, conversation_id, error = %e, "no summary available, sending recent messages only");
                        return Ok(SummaryOutcome::default());
                    }
                },
                Some(current) if current.use_count < reuse_limit => {
                    let mut reused = current.clone();
                    reused.use_count += 1;
                    reused.updated_at = Utc::now();
                    let expected = Some(current.version);
                    last_seen = Some(current);
                    (reused, expected)
                }
                Some(current) => match self.summarize(older, deadline).await {
                    Ok(text) => {
                        let refreshed = new_record(
                            tenant_id,
                            conversation_id,
                            text,
                            older,
                            current.version,
                            current.refresh_count + 1,
                        );
                        let expected = Some(current.version);
                        last_seen = Some(current);
                        (refreshed, expected)
                    }
                    Err(e) => {
                        tracing::warn!(
                            tenant_id,
                            conversation_id,
                            error = %e,
                            use_count = current.use_count,
                            "summary refresh failed, serving previous summary"
                        );
                        return Ok(SummaryOutcome {
                            text: Some(current.text),
                            refresh_count: current.refresh_count,
                        });
                    }
                },
            };

            if self.summaries.store(&record, expected).await? {
                return Ok(SummaryOutcome {
                    text: Some(record.text),
                    refresh_count: record.refresh_count,
                });
            }

            tracing::debug!(tenant_id, conversation_id, attempt, "summary write conflict, reloading");
        }

        tracing::warn!(tenant_id, conversation_id, "summary write kept conflicting, serving last read");
        Ok(match last_seen {
            Some(current) => SummaryOutcome {
                text: Some(current.text),
                refresh_count: current.refresh_count,
            },
            None => SummaryOutcome::default(),
        })
    }

    async fn summarize(&self, older: &[Message], deadline: &Deadline) -> Result<String> {
        let Some(ref summarizer) = self.summarizer else {
            return Err(ContextError::backend("summarizer", "not configured"));
        };

        let text = deadline
            .run("summarizer", summarizer.summarize(&render_history(older)))
            .await?;
        if text.trim().is_empty() {
            return Err(ContextError::backend("summarizer", "empty summary"));
        }
        Ok(text)
    }
}

fn verbatim(messages: Vec<Message>, tokens: usize) -> HistoryResolution {
    HistoryResolution {
        recent: messages,
        tokens_before: tokens,
        tokens_after: tokens,
        ..Default::default()
    }
}

fn new_record(
    tenant_id: &str,
    conversation_id: &str,
    text: String,
    older: &[Message],
    version: u64,
    refresh_count: u32,
) -> ConversationSummary {
    ConversationSummary {
        tenant_id: tenant_id.to_string(),
        conversation_id: conversation_id.to_string(),
        token_estimate: estimate_tokens(&text),
        text,
        covered_messages: older.len(),
        last_message_id: older.last().map(|m| m.id.clone()),
        use_count: 0,
        refresh_count,
        version,
        updated_at: Utc::now(),
    }
}
