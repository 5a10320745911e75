//! Groundline - context assembly for multi-tenant conversational assistants
//!
//! For every turn, decides what goes into the model input: which prior
//! messages stay verbatim, which are folded into a rolling summary, and which
//! tenant passages are attached, all under a token ceiling.

pub mod assembler;
pub mod config;
pub mod deadline;
pub mod engine;
pub mod error;
pub mod history;
pub mod llm;
pub mod logging;
pub mod retrieval;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use assembler::ContextAssembler;
pub use config::{BudgetConfig, Config, ProviderConfig, ProviderKind, RetrievalConfig, TurnConfig};
pub use deadline::Deadline;
pub use engine::{ContextEngine, EngineParts};
pub use error::{ContextError, Result};
pub use history::HistoryBudgetManager;
pub use llm::{estimate_tokens, GeminiProvider, LLMProvider, TokenMeter};
pub use retrieval::keyword::KeywordRanker;
pub use retrieval::{ChunkIndex, ChunkSource, FullTextIndex, RetrievalStrategy, SearchBackend};
pub use store::{HistoryStore, MemoryStore, SqliteStore, StoreStats, SummaryStore};
pub use types::{
    render_history, BudgetedContext, ChunkOrigin, ContentChunk, ContextSection, ConversationSummary,
    CrawledPage, HistoryResolution, Message, RetrievalQuery,
};
