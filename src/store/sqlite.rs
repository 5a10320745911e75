//! SQLite-backed store with zstd-compressed bodies.
//!
//! One database holds a tenant's chunk corpus, crawled pages, the message
//! log and the rolling summaries. Chunk and page text is compressed; message
//! text is kept plain so the log stays inspectable with the sqlite shell.

use super::{next_version, HistoryStore, SummaryStore};
use crate::retrieval::segment::segment_page;
use crate::retrieval::ChunkSource;
use crate::types::{ChunkOrigin, ContentChunk, ConversationSummary, CrawledPage, Message};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Compression level for zstd (1-22, higher = smaller but slower)
const COMPRESSION_LEVEL: i32 = 3;

/// Default crawl segment size in words
const DEFAULT_WINDOW_WORDS: usize = 500;

/// Clones share one connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    window_words: usize,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open store at {:?}", path))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            window_words: DEFAULT_WINDOW_WORDS,
        };
        store.init_schema()?;

        Ok(store)
    }

    /// Segment crawled pages into windows of `window_words` words.
    pub fn with_window_words(mut self, window_words: usize) -> Self {
        self.window_words = window_words;
        self
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("store connection lock poisoned"))
    }

    /// Run `op` on the blocking pool against this store's connection.
    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&SqliteStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .context("SQLite task failed")?
    }

    fn init_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS chunks (
                id           TEXT NOT NULL,
                tenant_id    TEXT NOT NULL,
                origin_kind  TEXT NOT NULL,
                origin_label TEXT NOT NULL,
                ordinal      INTEGER NOT NULL,
                content      BLOB NOT NULL,
                keywords     TEXT NOT NULL DEFAULT '[]',
                PRIMARY KEY (tenant_id, id)
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_source_order
                ON chunks(tenant_id, origin_kind, origin_label, ordinal);

            CREATE TABLE IF NOT EXISTS crawl_pages (
                id          TEXT PRIMARY KEY,
                tenant_id   TEXT NOT NULL,
                url         TEXT NOT NULL,
                title       TEXT,
                content     BLOB NOT NULL,
                crawled_at  TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_crawl_pages_tenant
                ON crawl_pages(tenant_id, crawled_at);

            -- One row per crawled URL; keep the newest copy before enforcing it
            DELETE FROM crawl_pages WHERE rowid NOT IN (
                SELECT MAX(rowid) FROM crawl_pages GROUP BY tenant_id, url
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_crawl_pages_url
                ON crawl_pages(tenant_id, url);

            CREATE TABLE IF NOT EXISTS messages (
                seq             INTEGER PRIMARY KEY AUTOINCREMENT,
                id              TEXT NOT NULL UNIQUE,
                tenant_id       TEXT NOT NULL,
                conversation_id TEXT NOT NULL,
                user_text       TEXT NOT NULL,
                reply_text      TEXT NOT NULL,
                token_cost      INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_conversation
                ON messages(tenant_id, conversation_id, created_at, seq);

            CREATE TABLE IF NOT EXISTS summaries (
                tenant_id        TEXT NOT NULL,
                conversation_id  TEXT NOT NULL,
                text             TEXT NOT NULL,
                token_estimate   INTEGER NOT NULL,
                covered_messages INTEGER NOT NULL,
                last_message_id  TEXT,
                use_count        INTEGER NOT NULL DEFAULT 0,
                refresh_count    INTEGER NOT NULL DEFAULT 0,
                version          INTEGER NOT NULL,
                updated_at       TEXT NOT NULL,
                PRIMARY KEY (tenant_id, conversation_id)
            );
            ",
        )?;

        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Corpus Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Store chunks for a tenant in one transaction. Existing ids are replaced.
    pub fn insert_chunks(&self, tenant_id: &str, chunks: &[ContentChunk]) -> Result<()> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO chunks
                    (id, tenant_id, origin_kind, origin_label, ordinal, content, keywords)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;

            for chunk in chunks {
                let (kind, label) = origin_columns(&chunk.origin);
                let keywords = serde_json::to_string(&chunk.keywords)?;
                stmt.execute(params![
                    chunk.id,
                    tenant_id,
                    kind,
                    label,
                    chunk.ordinal,
                    compress(&chunk.text)?,
                    keywords
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Store a crawled page whole; it is segmented when the corpus is read.
    ///
    /// A re-crawl of a URL the tenant already has replaces that page and keeps
    /// its id, so segment ids stay stable. Returns the id the page is stored under.
    pub fn insert_page(&self, page: &CrawledPage) -> Result<String> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT id FROM crawl_pages WHERE tenant_id = ?1 AND url = ?2",
                params![page.tenant_id, page.url],
                |row| row.get(0),
            )
            .optional()?;
        let id = existing.unwrap_or_else(|| page.id.clone());

        tx.execute(
            "INSERT OR REPLACE INTO crawl_pages (id, tenant_id, url, title, content, crawled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                page.tenant_id,
                page.url,
                page.title,
                compress(&page.content)?,
                format_time(&page.crawled_at)
            ],
        )?;

        tx.commit()?;
        Ok(id)
    }

    /// Crawled pages for a tenant, oldest crawl first.
    pub fn pages(&self, tenant_id: &str) -> Result<Vec<CrawledPage>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, url, title, content, crawled_at FROM crawl_pages
             WHERE tenant_id = ?1 ORDER BY crawled_at, id",
        )?;

        let rows = stmt.query_map(params![tenant_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Vec<u8>>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut pages = Vec::new();
        for row in rows {
            let (id, url, title, content, crawled_at) = row?;
            pages.push(CrawledPage {
                id,
                tenant_id: tenant_id.to_string(),
                url,
                title,
                content: decompress(&content)?,
                crawled_at: parse_time(&crawled_at)?,
            });
        }

        Ok(pages)
    }

    /// Ingested chunks in source order: documents before crawl-origin
    /// chunks, then by source label and ordinal.
    pub fn stored_chunks(&self, tenant_id: &str) -> Result<Vec<ContentChunk>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, origin_kind, origin_label, ordinal, content, keywords FROM chunks
             WHERE tenant_id = ?1
             ORDER BY origin_kind = 'crawl', origin_label, ordinal",
        )?;

        let rows = stmt.query_map(params![tenant_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, Vec<u8>>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut chunks = Vec::new();
        for row in rows {
            let (id, kind, label, ordinal, content, keywords) = row?;
            chunks.push(ContentChunk {
                id,
                origin: origin_from_columns(&kind, label)?,
                ordinal,
                text: decompress(&content)?,
                keywords: serde_json::from_str(&keywords)
                    .with_context(|| format!("Bad keywords column: {}", keywords))?,
                embedding: None,
            });
        }

        Ok(chunks)
    }

    /// Remove a tenant's chunks and crawled pages. Conversations are kept.
    pub fn delete_corpus(&self, tenant_id: &str) -> Result<usize> {
        let conn = self.conn()?;
        let chunks = conn.execute("DELETE FROM chunks WHERE tenant_id = ?1", params![tenant_id])?;
        let pages = conn.execute("DELETE FROM crawl_pages WHERE tenant_id = ?1", params![tenant_id])?;

        Ok(chunks + pages)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Stats
    // ─────────────────────────────────────────────────────────────────────────

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn()?;
        let count = |table: &str| -> Result<u64> {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
            Ok(n as u64)
        };

        let db_size: i64 = conn.query_row(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
            [],
            |row| row.get(0),
        )?;

        Ok(StoreStats {
            chunk_count: count("chunks")?,
            page_count: count("crawl_pages")?,
            message_count: count("messages")?,
            summary_count: count("summaries")?,
            db_size_bytes: db_size as u64,
        })
    }
}

/// Storage statistics.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub chunk_count: u64,
    pub page_count: u64,
    pub message_count: u64,
    pub summary_count: u64,
    pub db_size_bytes: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Blocking Operations
// ─────────────────────────────────────────────────────────────────────────────

impl SqliteStore {
    /// Ingested chunks followed by segmented crawl pages.
    pub fn corpus(&self, tenant_id: &str) -> Result<Vec<ContentChunk>> {
        let mut chunks = self.stored_chunks(tenant_id)?;
        for page in self.pages(tenant_id)? {
            chunks.extend(segment_page(&page, self.window_words));
        }
        Ok(chunks)
    }

    pub fn recent_messages(&self, tenant_id: &str, conversation_id: &str, limit: usize) -> Result<Vec<Message>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_text, reply_text, token_cost, created_at FROM messages
             WHERE tenant_id = ?1 AND conversation_id = ?2
             ORDER BY created_at DESC, seq DESC
             LIMIT ?3",
        )?;

        let rows = stmt.query_map(params![tenant_id, conversation_id, limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (id, user_text, reply_text, token_cost, created_at) = row?;
            messages.push(Message {
                id,
                tenant_id: tenant_id.to_string(),
                conversation_id: conversation_id.to_string(),
                user_text,
                reply_text,
                token_cost: token_cost as usize,
                created_at: parse_time(&created_at)?,
            });
        }
        messages.reverse();

        Ok(messages)
    }

    pub fn append_message(&self, message: &Message) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO messages
                    (id, tenant_id, conversation_id, user_text, reply_text, token_cost, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    message.id,
                    message.tenant_id,
                    message.conversation_id,
                    message.user_text,
                    message.reply_text,
                    message.token_cost as i64,
                    format_time(&message.created_at)
                ],
            )
            .with_context(|| format!("Failed to append message {}", message.id))?;

        Ok(())
    }

    pub fn load_summary(&self, tenant_id: &str, conversation_id: &str) -> Result<Option<ConversationSummary>> {
        let row = self
            .conn()?
            .query_row(
                "SELECT text, token_estimate, covered_messages, last_message_id,
                        use_count, refresh_count, version, updated_at
                 FROM summaries WHERE tenant_id = ?1 AND conversation_id = ?2",
                params![tenant_id, conversation_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, u32>(4)?,
                        row.get::<_, u32>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                },
            )
            .optional()?;

        let Some((text, token_estimate, covered, last_message_id, use_count, refresh_count, version, updated_at)) = row
        else {
            return Ok(None);
        };

        Ok(Some(ConversationSummary {
            tenant_id: tenant_id.to_string(),
            conversation_id: conversation_id.to_string(),
            text,
            token_estimate: token_estimate as usize,
            covered_messages: covered as usize,
            last_message_id,
            use_count,
            refresh_count,
            version: version as u64,
            updated_at: parse_time(&updated_at)?,
        }))
    }

    /// Compare-and-swap write; see [`SummaryStore::store`].
    pub fn store_summary(&self, summary: &ConversationSummary, expected_version: Option<u64>) -> Result<bool> {
        let conn = self.conn()?;
        let version = next_version(expected_version) as i64;
        let updated_at = format_time(&summary.updated_at);

        let changed = match expected_version {
            None => conn.execute(
                "INSERT OR IGNORE INTO summaries
                    (tenant_id, conversation_id, text, token_estimate, covered_messages,
                     last_message_id, use_count, refresh_count, version, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    summary.tenant_id,
                    summary.conversation_id,
                    summary.text,
                    summary.token_estimate as i64,
                    summary.covered_messages as i64,
                    summary.last_message_id,
                    summary.use_count,
                    summary.refresh_count,
                    version,
                    updated_at
                ],
            )?,
            Some(expected) => conn.execute(
                "UPDATE summaries
                 SET text = ?3, token_estimate = ?4, covered_messages = ?5, last_message_id = ?6,
                     use_count = ?7, refresh_count = ?8, version = ?9, updated_at = ?10
                 WHERE tenant_id = ?1 AND conversation_id = ?2 AND version = ?11",
                params![
                    summary.tenant_id,
                    summary.conversation_id,
                    summary.text,
                    summary.token_estimate as i64,
                    summary.covered_messages as i64,
                    summary.last_message_id,
                    summary.use_count,
                    summary.refresh_count,
                    version,
                    updated_at,
                    expected as i64
                ],
            )?,
        };

        Ok(changed == 1)
    }
}

#[async_trait]
impl ChunkSource for SqliteStore {
    async fn list_chunks(&self, tenant_id: &str) -> Result<Vec<ContentChunk>> {
        let tenant_id = tenant_id.to_string();
        self.blocking(move |store| store.corpus(&tenant_id)).await
    }
}

#[async_trait]
impl HistoryStore for SqliteStore {
    async fn load_recent(&self, tenant_id: &str, conversation_id: &str, limit: usize) -> Result<Vec<Message>> {
        let (tenant_id, conversation_id) = (tenant_id.to_string(), conversation_id.to_string());
        self.blocking(move |store| store.recent_messages(&tenant_id, &conversation_id, limit))
            .await
    }

    async fn append(&self, message: &Message) -> Result<()> {
        let message = message.clone();
        self.blocking(move |store| store.append_message(&message)).await
    }
}

#[async_trait]
impl SummaryStore for SqliteStore {
    async fn load(&self, tenant_id: &str, conversation_id: &str) -> Result<Option<ConversationSummary>> {
        let (tenant_id, conversation_id) = (tenant_id.to_string(), conversation_id.to_string());
        self.blocking(move |store| store.load_summary(&tenant_id, &conversation_id))
            .await
    }

    async fn store(&self, summary: &ConversationSummary, expected_version: Option<u64>) -> Result<bool> {
        let summary = summary.clone();
        self.blocking(move |store| store.store_summary(&summary, expected_version))
            .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Column Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn origin_columns(origin: &ChunkOrigin) -> (&'static str, &str) {
    match origin {
        ChunkOrigin::Document { document_id } => ("document", document_id),
        ChunkOrigin::Crawl { url } => ("crawl", url),
    }
}

fn origin_from_columns(kind: &str, label: String) -> Result<ChunkOrigin> {
    match kind {
        "document" => Ok(ChunkOrigin::Document { document_id: label }),
        "crawl" => Ok(ChunkOrigin::Crawl { url: label }),
        other => Err(anyhow!("Unknown chunk origin kind: {}", other)),
    }
}

/// Fixed-width UTC timestamps so text order is time order.
fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(text: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(text).with_context(|| format!("Bad timestamp: {}", text))?;
    Ok(parsed.with_timezone(&Utc))
}

/// Compress a string using zstd.
fn compress(data: &str) -> Result<Vec<u8>> {
    zstd::encode_all(data.as_bytes(), COMPRESSION_LEVEL).context("Failed to compress content")
}

/// Decompress zstd-compressed data to a string.
fn decompress(data: &[u8]) -> Result<String> {
    let decompressed = zstd::decode_all(data).context("Failed to decompress content")?;
    String::from_utf8(decompressed).context("Decompressed content is not valid UTF-8")
}
