//! BM25 full-text search using Tantivy
//!
//! Tenant-scoped keyword index over chunk text. Serves as a search backend
//! ahead of plain keyword scoring in the retrieval chain.

use super::SearchBackend;
use crate::types::{ChunkOrigin, ContentChunk};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema, Value, STORED, STRING, TEXT};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

const ORIGIN_DOCUMENT: &str = "document";
const ORIGIN_CRAWL: &str = "crawl";

/// Full-text index over all tenants' chunks. Clones share one index.
#[derive(Clone)]
pub struct FullTextIndex {
    index: Index,
    reader: IndexReader,
    writer: Arc<Mutex<IndexWriter>>,
    // Schema fields
    chunk_id_field: Field,
    tenant_id_field: Field,
    origin_kind_field: Field,
    origin_label_field: Field,
    ordinal_field: Field,
    content_field: Field,
    keywords_field: Field,
}

/// Remove stale Tantivy lock files that may be left after a crash
fn remove_stale_locks(index_path: &Path) {
    let _ = std::fs::remove_file(index_path.join(".tantivy-meta.lock"));
    let _ = std::fs::remove_file(index_path.join(".tantivy-writer.lock"));
}

impl FullTextIndex {
    /// Open or create an index under the given data directory
    pub fn open(data_dir: &Path) -> Result<Self> {
        let index_path = data_dir.join("fulltext");
        std::fs::create_dir_all(&index_path)
            .with_context(|| format!("Failed to create index dir at {:?}", index_path))?;

        let mut schema_builder = Schema::builder();
        let chunk_id_field = schema_builder.add_text_field("chunk_id", STRING | STORED);
        let tenant_id_field = schema_builder.add_text_field("tenant_id", STRING | STORED);
        let origin_kind_field = schema_builder.add_text_field("origin_kind", STRING | STORED);
        let origin_label_field = schema_builder.add_text_field("origin_label", STRING | STORED);
        let ordinal_field = schema_builder.add_u64_field("ordinal", STORED);
        let content_field = schema_builder.add_text_field("content", TEXT | STORED);
        let keywords_field = schema_builder.add_text_field("keywords", TEXT | STORED);
        let schema = schema_builder.build();

        let index = if index_path.join("meta.json").exists() {
            Index::open_in_dir(&index_path)
                .with_context(|| "Failed to open existing tantivy index")?
        } else {
            Index::create_in_dir(&index_path, schema.clone())
                .with_context(|| "Failed to create tantivy index")?
        };

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .context("Failed to create index reader")?;

        // 50MB writer heap; retry once if a crashed process left its lock behind
        let writer = match index.writer(50_000_000) {
            Ok(w) => w,
            Err(e) => {
                let err_str = e.to_string();
                if err_str.contains("Lockfile") || err_str.contains("LockBusy") {
                    tracing::warn!(path = ?index_path, "removing stale tantivy lock files");
                    remove_stale_locks(&index_path);
                    index
                        .writer(50_000_000)
                        .context("Failed to create index writer after removing stale locks")?
                } else {
                    return Err(e).context("Failed to create index writer");
                }
            }
        };

        Ok(Self {
            index,
            reader,
            writer: Arc::new(Mutex::new(writer)),
            chunk_id_field,
            tenant_id_field,
            origin_kind_field,
            origin_label_field,
            ordinal_field,
            content_field,
            keywords_field,
        })
    }

    fn writer(&self) -> Result<MutexGuard<'_, IndexWriter>> {
        self.writer
            .lock()
            .map_err(|_| anyhow::anyhow!("index writer lock poisoned"))
    }

    /// Commit and make the change visible to searches immediately
    fn commit(&self, mut writer: MutexGuard<'_, IndexWriter>) -> Result<()> {
        writer.commit().context("Failed to commit tantivy index")?;
        drop(writer);
        self.reader.reload().context("Failed to reload index reader")?;
        Ok(())
    }

    fn term(&self, field: Field, value: &str) -> Box<dyn Query> {
        Box::new(TermQuery::new(
            Term::from_field_text(field, value),
            IndexRecordOption::Basic,
        ))
    }

    /// Documents of one tenant whose `field` equals `value`
    fn tenant_scoped(&self, tenant_id: &str, field: Field, value: &str) -> Box<dyn Query> {
        Box::new(BooleanQuery::new(vec![
            (Occur::Must, self.term(self.tenant_id_field, tenant_id)),
            (Occur::Must, self.term(field, value)),
        ]))
    }

    /// Index a tenant's chunks, replacing that tenant's earlier copy of each id
    pub fn index_chunks(&self, tenant_id: &str, chunks: &[ContentChunk]) -> Result<()> {
        let writer = self.writer()?;
        self.add_chunks(&writer, tenant_id, chunks)?;
        self.commit(writer)
    }

    /// Swap every chunk a tenant has from one source (document id or page
    /// URL) for `chunks`, in a single commit.
    pub fn replace_source(&self, tenant_id: &str, label: &str, chunks: &[ContentChunk]) -> Result<()> {
        let writer = self.writer()?;
        writer
            .delete_query(self.tenant_scoped(tenant_id, self.origin_label_field, label))
            .context("Failed to delete source chunks")?;
        self.add_chunks(&writer, tenant_id, chunks)?;
        self.commit(writer)
    }

    fn add_chunks(&self, writer: &IndexWriter, tenant_id: &str, chunks: &[ContentChunk]) -> Result<()> {
        for chunk in chunks {
            writer
                .delete_query(self.tenant_scoped(tenant_id, self.chunk_id_field, &chunk.id))
                .context("Failed to queue chunk replacement")?;

            let (kind, label) = match &chunk.origin {
                ChunkOrigin::Document { document_id } => (ORIGIN_DOCUMENT, document_id.as_str()),
                ChunkOrigin::Crawl { url } => (ORIGIN_CRAWL, url.as_str()),
            };

            let mut doc = TantivyDocument::default();
            doc.add_text(self.chunk_id_field, &chunk.id);
            doc.add_text(self.tenant_id_field, tenant_id);
            doc.add_text(self.origin_kind_field, kind);
            doc.add_text(self.origin_label_field, label);
            doc.add_u64(self.ordinal_field, chunk.ordinal as u64);
            doc.add_text(self.content_field, &chunk.text);
            doc.add_text(self.keywords_field, chunk.keywords.join(" "));
            writer.add_document(doc)?;
        }

        Ok(())
    }

    /// Search one tenant's chunks
    pub fn search_tenant(&self, tenant_id: &str, query: &str, limit: usize) -> Result<Vec<ContentChunk>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let searcher = self.reader.searcher();

        let query_parser = QueryParser::for_index(
            &self.index,
            vec![self.content_field, self.keywords_field],
        );

        // Unparseable input is a miss, not a failure
        let content_query = match query_parser.parse_query(query) {
            Ok(q) => q,
            Err(_) => return Ok(vec![]),
        };

        let combined_query = BooleanQuery::new(vec![
            (Occur::Must, content_query),
            (Occur::Must, self.term(self.tenant_id_field, tenant_id)),
        ]);

        let top_docs = searcher
            .search(&combined_query, &TopDocs::with_limit(limit))
            .context("Tantivy search failed")?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (_score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(doc_address)
                .context("Failed to retrieve document")?;
            if let Some(chunk) = self.to_chunk(&doc) {
                results.push(chunk);
            }
        }

        Ok(results)
    }

    fn text_of(&self, doc: &TantivyDocument, field: Field) -> Option<String> {
        doc.get_first(field).and_then(|v| v.as_str()).map(str::to_string)
    }

    fn to_chunk(&self, doc: &TantivyDocument) -> Option<ContentChunk> {
        let id = self.text_of(doc, self.chunk_id_field)?;
        let label = self.text_of(doc, self.origin_label_field)?;
        let origin = match self.text_of(doc, self.origin_kind_field)?.as_str() {
            ORIGIN_CRAWL => ChunkOrigin::Crawl { url: label },
            _ => ChunkOrigin::Document { document_id: label },
        };
        let ordinal = doc.get_first(self.ordinal_field).and_then(|v| v.as_u64()).unwrap_or(0);
        let keywords = self
            .text_of(doc, self.keywords_field)
            .map(|k| k.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        Some(ContentChunk {
            id,
            origin,
            ordinal: ordinal as u32,
            text: self.text_of(doc, self.content_field)?,
            keywords,
            embedding: None,
        })
    }

    /// Delete all chunks for a tenant
    pub fn delete_tenant(&self, tenant_id: &str) -> Result<()> {
        let writer = self.writer()?;
        writer.delete_term(Term::from_field_text(self.tenant_id_field, tenant_id));
        self.commit(writer)
    }

    /// Delete one tenant's chunk; other tenants may reuse the id
    pub fn delete_chunk(&self, tenant_id: &str, chunk_id: &str) -> Result<()> {
        let writer = self.writer()?;
        writer
            .delete_query(self.tenant_scoped(tenant_id, self.chunk_id_field, chunk_id))
            .context("Failed to delete chunk")?;
        self.commit(writer)
    }


    /// Number of live documents across all tenants
    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }
}

#[async_trait]
impl SearchBackend for FullTextIndex {
    fn name(&self) -> &'static str {
        "full-text"
    }

    async fn search(&self, tenant_id: &str, query: &str, limit: usize) -> Result<Vec<ContentChunk>> {
        let index = self.clone();
        let tenant_id = tenant_id.to_string();
        let query = query.to_string();

        // Segment reads and doc fetches block
        tokio::task::spawn_blocking(move || index.search_tenant(&tenant_id, &query, limit))
            .await
            .context("Full-text search task failed")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn doc_chunk(id: &str, ordinal: u32, text: &str) -> ContentChunk {
        ContentChunk {
            id: id.to_string(),
            origin: ChunkOrigin::Document {
                document_id: "handbook".to_string(),
            },
            ordinal,
            text: text.to_string(),
            keywords: Vec::new(),
            embedding: None,
        }
    }

    #[test]
    fn test_index_and_search_by_tenant() {
        let temp_dir = TempDir::new().unwrap();
        let index = FullTextIndex::open(temp_dir.path()).unwrap();

        index
            .index_chunks(
                "acme",
                &[
                    doc_chunk("a1", 0, "Our pricing plans start at ten dollars a month"),
                    doc_chunk("a2", 1, "Support is available around the clock"),
                ],
            )
            .unwrap();
        index
            .index_chunks("globex", &[doc_chunk("g1", 0, "Globex pricing is negotiable")])
            .unwrap();

        let results = index.search_tenant("acme", "pricing", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a1");
        assert_eq!(results[0].ordinal, 0);
        assert_eq!(
            results[0].origin,
            ChunkOrigin::Document {
                document_id: "handbook".to_string()
            }
        );

        let results = index.search_tenant("globex", "pricing", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "g1");
    }

    #[test]
    fn test_reindex_replaces_chunk() {
        let temp_dir = TempDir::new().unwrap();
        let index = FullTextIndex::open(temp_dir.path()).unwrap();

        index.index_chunks("acme", &[doc_chunk("a1", 0, "old wording")]).unwrap();
        index.index_chunks("acme", &[doc_chunk("a1", 0, "new wording")]).unwrap();

        assert_eq!(index.num_docs(), 1);
        assert!(index.search_tenant("acme", "old", 10).unwrap().is_empty());
        assert_eq!(index.search_tenant("acme", "new", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_crawl_origin_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let index = FullTextIndex::open(temp_dir.path()).unwrap();

        let chunk = ContentChunk {
            id: "p1:0".to_string(),
            origin: ChunkOrigin::Crawl {
                url: "https://acme.test/faq".to_string(),
            },
            ordinal: 0,
            text: "Returns are accepted within thirty days".to_string(),
            keywords: vec!["returns".to_string()],
            embedding: None,
        };
        index.index_chunks("acme", &[chunk.clone()]).unwrap();

        let results = index.search_tenant("acme", "returns", 5).unwrap();
        assert_eq!(results, vec![chunk]);
    }

    #[test]
    fn test_unparseable_query_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let index = FullTextIndex::open(temp_dir.path()).unwrap();
        index.index_chunks("acme", &[doc_chunk("a1", 0, "anything")]).unwrap();

        let results = index.search_tenant("acme", "title:(((", 5).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_delete_tenant() {
        let temp_dir = TempDir::new().unwrap();
        let index = FullTextIndex::open(temp_dir.path()).unwrap();

        index.index_chunks("acme", &[doc_chunk("a1", 0, "test document one")]).unwrap();
        index.index_chunks("globex", &[doc_chunk("g1", 0, "test document two")]).unwrap();

        index.delete_tenant("acme").unwrap();

        assert!(index.search_tenant("acme", "document", 10).unwrap().is_empty());
        assert_eq!(index.search_tenant("globex", "document", 10).unwrap().len(), 1);

        index.delete_chunk("globex", "g1").unwrap();
        assert!(index.search_tenant("globex", "document", 10).unwrap().is_empty());
    }

    #[test]
    fn test_shared_chunk_id_stays_per_tenant() {
        let temp_dir = TempDir::new().unwrap();
        let index = FullTextIndex::open(temp_dir.path()).unwrap();

        index.index_chunks("acme", &[doc_chunk("c1", 0, "acme pricing sheet")]).unwrap();
        index.index_chunks("globex", &[doc_chunk("c1", 0, "globex careers page")]).unwrap();

        assert_eq!(index.num_docs(), 2);
        let acme = index.search_tenant("acme", "pricing", 10).unwrap();
        assert_eq!(acme.len(), 1);
        assert_eq!(acme[0].text, "acme pricing sheet");

        index.delete_chunk("globex", "c1").unwrap();
        assert_eq!(index.search_tenant("acme", "pricing", 10).unwrap().len(), 1);
        assert!(index.search_tenant("globex", "careers", 10).unwrap().is_empty());
    }

    #[test]
    fn test_replace_source_drops_stale_segments() {
        let temp_dir = TempDir::new().unwrap();
        let index = FullTextIndex::open(temp_dir.path()).unwrap();

        let segment = |id: &str, ordinal: u32, text: &str| ContentChunk {
            id: id.to_string(),
            origin: ChunkOrigin::Crawl {
                url: "https://acme.test/faq".to_string(),
            },
            ordinal,
            text: text.to_string(),
            keywords: Vec::new(),
            embedding: None,
        };
        let url = "https://acme.test/faq";
        index
            .replace_source("acme", url, &[segment("p1:0", 0, "shipping takes a week"), segment("p1:1", 1, "shipping is free")])
            .unwrap();
        index.index_chunks("acme", &[doc_chunk("a1", 0, "shipping policy handbook")]).unwrap();
        index.index_chunks("globex", &[segment("p9:0", 0, "shipping overseas")]).unwrap();

        // Re-crawl came back shorter: one segment instead of two
        index.replace_source("acme", url, &[segment("p1:0", 0, "returns only")]).unwrap();

        let left = index.search_tenant("acme", "shipping", 10).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, "a1");
        assert_eq!(index.search_tenant("acme", "returns", 10).unwrap().len(), 1);
        assert_eq!(index.search_tenant("globex", "shipping", 10).unwrap().len(), 1);
        assert_eq!(index.num_docs(), 3);
    }

    #[tokio::test]
    async fn test_backend_search_runs_off_runtime() {
        let temp_dir = TempDir::new().unwrap();
        let index = FullTextIndex::open(temp_dir.path()).unwrap();
        index.index_chunks("acme", &[doc_chunk("a1", 0, "pricing table")]).unwrap();

        let backend: &dyn SearchBackend = &index;
        let results = backend.search("acme", "pricing", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(backend.name(), "full-text");
    }
}
