//! Shared data types for context assembly.
//!
//! These types are the currency between the stores, the retrieval index,
//! the history budget manager and the assembler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One user/assistant exchange in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub tenant_id: String,
    pub conversation_id: String,
    pub user_text: String,
    pub reply_text: String,
    /// Tokens charged for this turn
    pub token_cost: usize,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a new exchange stamped with the current time.
    pub fn new(
        tenant_id: impl Into<String>,
        conversation_id: impl Into<String>,
        user_text: impl Into<String>,
        reply_text: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            conversation_id: conversation_id.into(),
            user_text: user_text.into(),
            reply_text: reply_text.into(),
            token_cost: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_token_cost(mut self, token_cost: usize) -> Self {
        self.token_cost = token_cost;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Serialize messages the way they are presented to the model.
///
/// Token costs are always measured against this rendering so that
/// `tokens_before` and `tokens_after` are comparable.
pub fn render_history(messages: &[Message]) -> String {
    let mut out = String::new();
    for msg in messages {
        out.push_str("User: ");
        out.push_str(&msg.user_text);
        out.push_str("\nAssistant: ");
        out.push_str(&msg.reply_text);
        out.push_str("\n\n");
    }
    out
}

/// Rolling summary of the older part of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub tenant_id: String,
    pub conversation_id: String,
    pub text: String,
    /// Heuristic token cost of `text`
    pub token_estimate: usize,
    /// Number of messages folded into this summary
    pub covered_messages: usize,
    pub last_message_id: Option<String>,
    /// Times served since the last regeneration
    pub use_count: u32,
    /// Lifetime regenerations
    pub refresh_count: u32,
    /// Bumped on every successful write; used for compare-and-swap
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

/// Where a chunk came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChunkOrigin {
    Document { document_id: String },
    Crawl { url: String },
}

impl ChunkOrigin {
    pub fn label(&self) -> &str {
        match self {
            Self::Document { document_id } => document_id,
            Self::Crawl { url } => url,
        }
    }
}

/// A unit of retrievable text produced by the chunking pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentChunk {
    pub id: String,
    pub origin: ChunkOrigin,
    /// Position within its source
    pub ordinal: u32,
    pub text: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Owned by the retrieval backend; opaque here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// A page fetched by the crawler, stored whole and segmented on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawledPage {
    pub id: String,
    pub tenant_id: String,
    pub url: String,
    pub title: Option<String>,
    pub content: String,
    pub crawled_at: DateTime<Utc>,
}

/// A ranked lookup request against a tenant's corpus.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RetrievalQuery {
    pub tenant_id: String,
    pub text: String,
    pub limit: usize,
}

impl RetrievalQuery {
    pub fn new(tenant_id: impl Into<String>, text: impl Into<String>, limit: usize) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            text: text.into(),
            limit,
        }
    }
}

/// Outcome of resolving a conversation's history against the token budget.
#[derive(Debug, Clone, Default)]
pub struct HistoryResolution {
    /// Verbatim messages, chronological
    pub recent: Vec<Message>,
    /// Rolling summary of older messages, if any
    pub summary: Option<String>,
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub was_summarized: bool,
    pub refresh_count: u32,
}

/// One ordered piece of an assembled context.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ContextSection<'a> {
    Persona(&'a str),
    Chunk(&'a ContentChunk),
    Summary(&'a str),
    Turn(&'a Message),
}

/// The bounded context handed to the prompt builder.
#[derive(Debug, Clone, Default)]
pub struct BudgetedContext {
    pub persona: Option<String>,
    pub chunks: Vec<ContentChunk>,
    pub summary: Option<String>,
    pub recent_messages: Vec<Message>,
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub was_summarized: bool,
    pub refresh_count: u32,
    /// Estimated size of everything above
    pub total_tokens: usize,
}

impl BudgetedContext {
    /// Content in presentation order: persona, chunks, summary, then turns.
    pub fn sections(&self) -> Vec<ContextSection<'_>> {
        let mut sections = Vec::with_capacity(self.chunks.len() + self.recent_messages.len() + 2);
        if let Some(ref persona) = self.persona {
            sections.push(ContextSection::Persona(persona));
        }
        sections.extend(self.chunks.iter().map(ContextSection::Chunk));
        if let Some(ref summary) = self.summary {
            sections.push(ContextSection::Summary(summary));
        }
        sections.extend(self.recent_messages.iter().map(ContextSection::Turn));
        sections
    }
}
