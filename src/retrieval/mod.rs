//! Ranked retrieval over a tenant's content chunks.
//!
//! `ChunkIndex` walks an ordered chain of strategies (search backends
//! first, keyword scoring last) and returns the first non-empty answer.

pub mod cache;
pub mod fulltext;
pub mod keyword;
pub mod segment;

use crate::deadline::Deadline;
use crate::error::{ContextError, Result};
use crate::types::{ContentChunk, RetrievalQuery};
use async_trait::async_trait;
use cache::QueryCache;
use keyword::{normalize_query, KeywordRanker};
use std::sync::Arc;
use std::time::Duration;

pub use fulltext::FullTextIndex;

/// Source of a tenant's full chunk set, in source order.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    async fn list_chunks(&self, tenant_id: &str) -> anyhow::Result<Vec<ContentChunk>>;
}

/// A ranked search service (semantic or full-text). May be unavailable.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(&self, tenant_id: &str, query: &str, limit: usize) -> anyhow::Result<Vec<ContentChunk>>;
}

/// One link of the retrieval chain.
#[async_trait]
pub trait RetrievalStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn try_retrieve(&self, query: &RetrievalQuery, deadline: &Deadline) -> Result<Vec<ContentChunk>>;
}

/// Delegates to a search backend under the turn deadline.
pub struct BackendStrategy {
    backend: Arc<dyn SearchBackend>,
}

impl BackendStrategy {
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl RetrievalStrategy for BackendStrategy {
    fn name(&self) -> &'static str {
        self.backend.name()
    }

    async fn try_retrieve(&self, query: &RetrievalQuery, deadline: &Deadline) -> Result<Vec<ContentChunk>> {
        let mut chunks = deadline
            .run(
                self.backend.name(),
                self.backend.search(&query.tenant_id, &query.text, query.limit),
            )
            .await?;
        chunks.truncate(query.limit);
        Ok(chunks)
    }
}

/// Loads the whole corpus and scores it locally.
pub struct KeywordStrategy {
    source: Arc<dyn ChunkSource>,
    ranker: KeywordRanker,
}

impl KeywordStrategy {
    pub fn new(source: Arc<dyn ChunkSource>, ranker: KeywordRanker) -> Self {
        Self { source, ranker }
    }
}

#[async_trait]
impl RetrievalStrategy for KeywordStrategy {
    fn name(&self) -> &'static str {
        "keyword"
    }

    async fn try_retrieve(&self, query: &RetrievalQuery, _deadline: &Deadline) -> Result<Vec<ContentChunk>> {
        let corpus = self.source.list_chunks(&query.tenant_id).await?;
        Ok(self.ranker.rank(corpus, &query.text, query.limit))
    }
}

pub struct ChunkIndex {
    strategies: Vec<Box<dyn RetrievalStrategy>>,
    cache: Option<QueryCache>,
}

impl ChunkIndex {
    /// Index with keyword scoring only.
    pub fn new(source: Arc<dyn ChunkSource>, ranker: KeywordRanker) -> Self {
        Self {
            strategies: vec![Box::new(KeywordStrategy::new(source, ranker))],
            cache: None,
        }
    }

    /// Try `backend` before everything added so far except keyword scoring.
    pub fn with_backend(mut self, backend: Arc<dyn SearchBackend>) -> Self {
        let at = self.strategies.len().saturating_sub(1);
        self.strategies.insert(at, Box::new(BackendStrategy::new(backend)));
        self
    }

    /// Memoize up to `max_entries` results for `ttl`; a zero TTL disables caching.
    pub fn with_cache(mut self, ttl: Duration, max_entries: usize) -> Self {
        self.cache = (!ttl.is_zero()).then(|| QueryCache::new(ttl, max_entries));
        self
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Forget cached results for a tenant whose corpus changed.
    pub fn invalidate_tenant(&self, tenant_id: &str) {
        if let Some(ref cache) = self.cache {
            cache.invalidate_tenant(tenant_id);
        }
    }

    /// Up to `query.limit` chunks, best first. Never fails: a broken link is
    /// skipped, and an exhausted chain yields an empty list.
    pub async fn retrieve(&self, query: &RetrievalQuery, deadline: &Deadline) -> Vec<ContentChunk> {
        if query.limit == 0 {
            return Vec::new();
        }

        let normalized = normalize_query(&query.text);
        if let Some(ref cache) = self.cache {
            if let Some(hit) = cache.get(&query.tenant_id, &normalized, query.limit) {
                tracing::debug!(tenant_id = %query.tenant_id, "retrieval cache hit");
                return hit;
            }
            tracing::debug!(tenant_id = %query.tenant_id, "retrieval cache miss");
        }

        for strategy in &self.strategies {
            match strategy.try_retrieve(query, deadline).await {
                Ok(chunks) if !chunks.is_empty() => {
                    tracing::debug!(
                        tenant_id = %query.tenant_id,
                        strategy = strategy.name(),
                        count = chunks.len(),
                        "retrieved chunks"
                    );
                    if let Some(ref cache) = self.cache {
                        cache.put(&query.tenant_id, &normalized, query.limit, &chunks);
                    }
                    return chunks;
                }
                Ok(_) => {
                    tracing::debug!(tenant_id = %query.tenant_id, strategy = strategy.name(), "no results");
                }
                Err(e @ ContextError::Storage(_)) => {
                    tracing::error!(tenant_id = %query.tenant_id, strategy = strategy.name(), error = %e, "corpus unavailable");
                }
                Err(e) => {
                    tracing::warn!(tenant_id = %query.tenant_id, strategy = strategy.name(), error = %e, "retrieval backend failed, falling back");
                }
            }
        }

        Vec::new()
    }
}
