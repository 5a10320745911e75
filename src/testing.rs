//! Scripted collaborators for unit tests.

use crate::llm::{estimate_tokens, LLMProvider, ModelMetadata};
use crate::retrieval::SearchBackend;
use crate::types::{ChunkOrigin, ContentChunk, Message};
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Provider whose counts and summaries are predictable.
pub struct ScriptedProvider {
    fixed_count: Option<usize>,
    context_window: usize,
    summarize_delay: Option<Duration>,
    count_failing: AtomicBool,
    summarize_failing: AtomicBool,
    count_calls: AtomicUsize,
    summarize_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            fixed_count: None,
            context_window: 32_768,
            summarize_delay: None,
            count_failing: AtomicBool::new(false),
            summarize_failing: AtomicBool::new(false),
            count_calls: AtomicUsize::new(0),
            summarize_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_fixed_count(mut self, tokens: usize) -> Self {
        self.fixed_count = Some(tokens);
        self
    }

    pub fn with_context_window(mut self, tokens: usize) -> Self {
        self.context_window = tokens;
        self
    }

    pub fn with_summarize_delay(mut self, delay: Duration) -> Self {
        self.summarize_delay = Some(delay);
        self
    }

    pub fn set_count_failing(&self, failing: bool) {
        self.count_failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_summarize_failing(&self, failing: bool) {
        self.summarize_failing.store(failing, Ordering::SeqCst);
    }

    pub fn count_calls(&self) -> usize {
        self.count_calls.load(Ordering::SeqCst)
    }

    pub fn summarize_calls(&self) -> usize {
        self.summarize_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn metadata(&self) -> ModelMetadata {
        ModelMetadata {
            id: "scripted".to_string(),
            context_window: self.context_window,
        }
    }

    async fn count_tokens(&self, text: &str) -> Result<usize> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        if self.count_failing.load(Ordering::SeqCst) {
            bail!("counting endpoint returned 503");
        }
        Ok(self.fixed_count.unwrap_or_else(|| estimate_tokens(text)))
    }

    async fn summarize(&self, text: &str) -> Result<String> {
        let n = self.summarize_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.summarize_delay {
            tokio::time::sleep(delay).await;
        }
        if self.summarize_failing.load(Ordering::SeqCst) {
            bail!("summarization endpoint returned 503");
        }
        Ok(format!("summary #{} of {} chars", n, text.len()))
    }
}

/// Search backend with canned results.
pub struct StaticBackend {
    name: &'static str,
    results: Vec<ContentChunk>,
    failing: bool,
    calls: AtomicUsize,
}

impl StaticBackend {
    pub fn named(name: &'static str) -> Self {
        Self {
            name,
            results: Vec::new(),
            failing: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn returning(results: Vec<ContentChunk>) -> Self {
        Self {
            results,
            ..Self::named("semantic")
        }
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::named("semantic")
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchBackend for StaticBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn search(&self, _tenant_id: &str, _query: &str, limit: usize) -> Result<Vec<ContentChunk>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            bail!("connection refused");
        }
        Ok(self.results.iter().take(limit).cloned().collect())
    }
}

pub fn doc_chunk(id: &str, ordinal: u32, text: &str) -> ContentChunk {
    ContentChunk {
        id: id.to_string(),
        origin: ChunkOrigin::Document {
            document_id: "doc".to_string(),
        },
        ordinal,
        text: text.to_string(),
        keywords: Vec::new(),
        embedding: None,
    }
}

/// `n` exchanges one minute apart; each renders to roughly
/// `approx_tokens` heuristic tokens.
pub fn conversation(tenant_id: &str, conversation_id: &str, n: usize, approx_tokens: usize) -> Vec<Message> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
    let half = (approx_tokens * 4).saturating_sub(24) / 2;
    (0..n)
        .map(|i| {
            Message::new(
                tenant_id,
                conversation_id,
                format!("q{:03} {}", i, "u".repeat(half)),
                format!("a{:03} {}", i, "r".repeat(half)),
            )
            .with_created_at(start + ChronoDuration::minutes(i as i64))
        })
        .collect()
}
