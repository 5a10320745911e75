//! Durable conversation state.
//!
//! Two record kinds live here: the append-only message log and the rolling
//! summary. Summary writes are compare-and-swap on `version`, so concurrent
//! turns of one conversation can never interleave a partial update.

pub mod memory;
pub mod sqlite;

use crate::types::{ConversationSummary, Message};
use anyhow::Result;
use async_trait::async_trait;

pub use memory::MemoryStore;
pub use sqlite::{SqliteStore, StoreStats};

/// Append-only per-conversation message log.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// The newest `limit` messages, oldest first. Unknown conversations
    /// are empty.
    async fn load_recent(&self, tenant_id: &str, conversation_id: &str, limit: usize) -> Result<Vec<Message>>;

    async fn append(&self, message: &Message) -> Result<()>;
}

/// At most one rolling summary per (tenant, conversation).
#[async_trait]
pub trait SummaryStore: Send + Sync {
    async fn load(&self, tenant_id: &str, conversation_id: &str) -> Result<Option<ConversationSummary>>;

    /// Write `summary` if the stored version still equals `expected_version`
    /// (`None` means "must not exist yet"). The written record's version is
    /// `expected_version + 1`, or 1 for a first write; `summary.version` is
    /// ignored. Returns false on conflict.
    async fn store(&self, summary: &ConversationSummary, expected_version: Option<u64>) -> Result<bool>;
}

/// Version a record will carry after a successful CAS against `expected`.
pub fn next_version(expected: Option<u64>) -> u64 {
    expected.map_or(1, |v| v + 1)
}
