//! In-process store for tests and ephemeral sessions.

use super::{next_version, HistoryStore, SummaryStore};
use crate::retrieval::segment::segment_page;
use crate::retrieval::ChunkSource;
use crate::types::{ChunkOrigin, ContentChunk, ConversationSummary, CrawledPage, Message};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

type ConversationKey = (String, String);

#[derive(Default)]
struct State {
    chunks: HashMap<String, Vec<ContentChunk>>,
    pages: HashMap<String, Vec<CrawledPage>>,
    messages: HashMap<ConversationKey, Vec<Message>>,
    summaries: HashMap<ConversationKey, ConversationSummary>,
}

pub struct MemoryStore {
    window_words: usize,
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_window_words(500)
    }

    pub fn with_window_words(window_words: usize) -> Self {
        Self {
            window_words,
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn put_chunks(&self, tenant_id: &str, chunks: Vec<ContentChunk>) {
        self.state()
            .chunks
            .entry(tenant_id.to_string())
            .or_default()
            .extend(chunks);
    }

    /// Store a crawled page. A page with the same URL is replaced in place
    /// and its id kept; the id the page is stored under is returned.
    pub fn put_page(&self, mut page: CrawledPage) -> String {
        let mut state = self.state();
        let pages = state.pages.entry(page.tenant_id.clone()).or_default();

        match pages.iter_mut().find(|p| p.url == page.url) {
            Some(existing) => {
                page.id = existing.id.clone();
                let id = page.id.clone();
                *existing = page;
                id
            }
            None => {
                let id = page.id.clone();
                pages.push(page);
                id
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn key(tenant_id: &str, conversation_id: &str) -> ConversationKey {
    (tenant_id.to_string(), conversation_id.to_string())
}

#[async_trait]
impl ChunkSource for MemoryStore {
    async fn list_chunks(&self, tenant_id: &str) -> Result<Vec<ContentChunk>> {
        let state = self.state();

        let mut chunks = state.chunks.get(tenant_id).cloned().unwrap_or_default();
        chunks.sort_by(|a, b| {
            let a_key = (matches!(a.origin, ChunkOrigin::Crawl { .. }), a.origin.label(), a.ordinal);
            let b_key = (matches!(b.origin, ChunkOrigin::Crawl { .. }), b.origin.label(), b.ordinal);
            a_key.cmp(&b_key)
        });

        if let Some(pages) = state.pages.get(tenant_id) {
            let mut pages: Vec<&CrawledPage> = pages.iter().collect();
            pages.sort_by(|a, b| a.crawled_at.cmp(&b.crawled_at).then_with(|| a.id.cmp(&b.id)));
            for page in pages {
                chunks.extend(segment_page(page, self.window_words));
            }
        }

        Ok(chunks)
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn load_recent(&self, tenant_id: &str, conversation_id: &str, limit: usize) -> Result<Vec<Message>> {
        let state = self.state();
        let Some(log) = state.messages.get(&key(tenant_id, conversation_id)) else {
            return Ok(Vec::new());
        };

        // Stable sort keeps insertion order for equal timestamps
        let mut ordered = log.clone();
        ordered.sort_by_key(|m| m.created_at);
        let skip = ordered.len().saturating_sub(limit);
        Ok(ordered.split_off(skip))
    }

    async fn append(&self, message: &Message) -> Result<()> {
        self.state()
            .messages
            .entry(key(&message.tenant_id, &message.conversation_id))
            .or_default()
            .push(message.clone());
        Ok(())
    }
}

#[async_trait]
impl SummaryStore for MemoryStore {
    async fn load(&self, tenant_id: &str, conversation_id: &str) -> Result<Option<ConversationSummary>> {
        Ok(self.state().summaries.get(&key(tenant_id, conversation_id)).cloned())
    }

    async fn store(&self, summary: &ConversationSummary, expected_version: Option<u64>) -> Result<bool> {
        let mut state = self.state();
        let k = key(&summary.tenant_id, &summary.conversation_id);

        let current = state.summaries.get(&k).map(|s| s.version);
        if current != expected_version {
            return Ok(false);
        }

        let mut record = summary.clone();
        record.version = next_version(expected_version);
        state.summaries.insert(k, record);
        Ok(true)
    }
}
