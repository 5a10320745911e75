//! Query result cache.
//!
//! Memoizes retrieval results per (tenant, normalized query, limit) for a
//! fixed TTL so repeated questions skip the backend chain. Capacity is
//! bounded; the least recently used entry goes first.

use crate::types::ContentChunk;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    tenant_id: String,
    query: String,
    limit: usize,
}

struct CacheEntry {
    chunks: Vec<ContentChunk>,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

pub struct QueryCache {
    ttl: Duration,
    entries: Mutex<LruCache<CacheKey, CacheEntry>>,
}

impl QueryCache {
    /// Capacity used when configured with zero entries
    pub const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1000) {
        Some(n) => n,
        None => unreachable!(),
    };

    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(Self::DEFAULT_CAPACITY);
        Self {
            ttl,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn key(tenant_id: &str, normalized_query: &str, limit: usize) -> CacheKey {
        CacheKey {
            tenant_id: tenant_id.to_string(),
            query: normalized_query.to_string(),
            limit,
        }
    }

    fn entries(&self) -> MutexGuard<'_, LruCache<CacheKey, CacheEntry>> {
        // Entries are plain data, a panicked holder cannot leave them torn
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, tenant_id: &str, normalized_query: &str, limit: usize) -> Option<Vec<ContentChunk>> {
        let mut entries = self.entries();
        let key = Self::key(tenant_id, normalized_query, limit);

        // LruCache::get bumps recency, so it needs the lock mutably
        let expired = match entries.get(&key) {
            Some(entry) if !entry.is_expired() => return Some(entry.chunks.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(&key);
        }
        None
    }

    pub fn put(&self, tenant_id: &str, normalized_query: &str, limit: usize, chunks: &[ContentChunk]) {
        self.entries().put(
            Self::key(tenant_id, normalized_query, limit),
            CacheEntry {
                chunks: chunks.to_vec(),
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Drop every entry for a tenant (its corpus changed).
    pub fn invalidate_tenant(&self, tenant_id: &str) {
        let mut entries = self.entries();
        let stale: Vec<CacheKey> = entries
            .iter()
            .filter(|(key, _)| key.tenant_id == tenant_id)
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            entries.pop(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries().cap().get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChunkOrigin;

    fn chunk(id: &str) -> ContentChunk {
        ContentChunk {
            id: id.to_string(),
            origin: ChunkOrigin::Document {
                document_id: "doc".to_string(),
            },
            ordinal: 0,
            text: "text".to_string(),
            keywords: Vec::new(),
            embedding: None,
        }
    }

    #[test]
    fn test_hit_after_put() {
        let cache = QueryCache::new(Duration::from_secs(60), 16);
        cache.put("acme", "pricing", 3, &[chunk("c1")]);

        let hit = cache.get("acme", "pricing", 3).unwrap();
        assert_eq!(hit[0].id, "c1");
        assert!(cache.get("acme", "pricing", 4).is_none());
        assert!(cache.get("other", "pricing", 3).is_none());
    }

    #[test]
    fn test_expired_entries_miss() {
        let cache = QueryCache::new(Duration::ZERO, 16);
        cache.put("acme", "pricing", 3, &[chunk("c1")]);
        assert!(cache.get("acme", "pricing", 3).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_tenant() {
        let cache = QueryCache::new(Duration::from_secs(60), 16);
        cache.put("acme", "pricing", 3, &[chunk("c1")]);
        cache.put("globex", "pricing", 3, &[chunk("c2")]);

        cache.invalidate_tenant("acme");

        assert!(cache.get("acme", "pricing", 3).is_none());
        assert!(cache.get("globex", "pricing", 3).is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let cache = QueryCache::new(Duration::from_secs(60), 2);
        cache.put("acme", "pricing", 3, &[chunk("c1")]);
        cache.put("acme", "careers", 3, &[chunk("c2")]);

        // Touch "pricing" so "careers" is the oldest
        assert!(cache.get("acme", "pricing", 3).is_some());
        cache.put("acme", "returns", 3, &[chunk("c3")]);

        assert_eq!(cache.len(), 2);
        assert!(cache.get("acme", "careers", 3).is_none());
        assert!(cache.get("acme", "pricing", 3).is_some());
        assert!(cache.get("acme", "returns", 3).is_some());
    }

    #[test]
    fn test_distinct_queries_stay_bounded() {
        let cache = QueryCache::new(Duration::from_secs(60), 50);
        for i in 0..500 {
            cache.put("acme", &format!("question {}", i), 3, &[chunk("c1")]);
        }
        assert_eq!(cache.len(), 50);
        assert!(cache.get("acme", "question 499", 3).is_some());
        assert!(cache.get("acme", "question 0", 3).is_none());
    }

    #[test]
    fn test_zero_capacity_uses_default() {
        let cache = QueryCache::new(Duration::from_secs(60), 0);
        assert_eq!(cache.capacity(), QueryCache::DEFAULT_CAPACITY.get());
    }
}
