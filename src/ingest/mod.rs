//! Document ingestion
//!
//! Acquire text from a source, chunk it and replace the document's stored
//! chunks. A document record is only created once usable text exists, so a
//! failed acquisition never leaves an empty document behind.

use crate::acquire::{
    acquire_with, content_hash, joined_text, AcquisitionStrategy, CrawlOptions, CrawlStrategy,
    PageFetcher, PdfTextStrategy, SinglePageStrategy, Source, SourceKind,
};
use crate::analysis::Reingest;
use crate::chunk::Chunker;
use crate::error::ComplianceError;
use crate::storage::{ComplianceStore, DocumentRecord};
use anyhow::{Context, Result};
use serde::Serialize;
use url::Url;

/// Documents with less extracted text than this are rejected
pub const DEFAULT_MIN_DOCUMENT_CHARS: usize = 100;

/// Outcome of an ingestion
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub name: String,
    pub page_count: usize,
    pub chunk_count: usize,
    pub content_hash: String,
    /// Whether the text differs from the previous ingestion
    pub changed: bool,
    /// Whether an existing document record was reused
    pub reused: bool,
    /// Acquisition strategy that produced the text
    pub strategy: String,
}

/// Acquire → chunk → store pipeline
pub struct Ingestor<'a> {
    store: &'a dyn ComplianceStore,
    fetcher: &'a dyn PageFetcher,
    crawl: CrawlOptions,
    chunker: Chunker,
    min_document_chars: usize,
}

impl<'a> Ingestor<'a> {
    pub fn new(store: &'a dyn ComplianceStore, fetcher: &'a dyn PageFetcher) -> Self {
        Self {
            store,
            fetcher,
            crawl: CrawlOptions::default(),
            chunker: Chunker::default(),
            min_document_chars: DEFAULT_MIN_DOCUMENT_CHARS,
        }
    }

    pub fn with_crawl_options(mut self, crawl: CrawlOptions) -> Self {
        self.crawl = crawl;
        self
    }

    pub fn with_chunker(mut self, chunker: Chunker) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn with_min_document_chars(mut self, min_document_chars: usize) -> Self {
        self.min_document_chars = min_document_chars;
        self
    }

    fn strategies(&self) -> Vec<Box<dyn AcquisitionStrategy + '_>> {
        vec![
            Box::new(PdfTextStrategy),
            Box::new(CrawlStrategy::new(self.fetcher, self.crawl.clone())),
            Box::new(SinglePageStrategy::new(self.fetcher)),
        ]
    }

    /// Ingest a source.
    ///
    /// URLs that were ingested before reuse their document record; every PDF
    /// upload becomes a new document.
    pub async fn ingest(&self, source: &Source, name: Option<&str>) -> Result<IngestReport> {
        let existing = match source.kind() {
            SourceKind::Url => self.store.find_document_by_source(&source.origin())?,
            SourceKind::Pdf => None,
        };

        let target = match existing {
            Some(document) => Target::Existing(document),
            None => Target::New(DocumentRecord::new(
                name.unwrap_or(&source.display_name()),
                &source.origin(),
                source.kind(),
            )),
        };

        self.run(source, target).await
    }

    /// Rebuild a stored document's chunks from its original path or URL
    pub async fn reingest_document(&self, document_id: &str) -> Result<IngestReport> {
        let document = self
            .store
            .get_document(document_id)?
            .ok_or_else(|| ComplianceError::DocumentNotFound(document_id.to_string()))?;

        let source = match document.kind {
            SourceKind::Pdf => {
                let bytes = tokio::fs::read(&document.source)
                    .await
                    .map_err(|e| ComplianceError::unavailable(&document.source, e.to_string()))?;
                Source::Pdf {
                    name: document.name.clone(),
                    bytes,
                    path: Some(document.source.clone()),
                }
            }
            SourceKind::Url => Source::Url(
                Url::parse(&document.source)
                    .with_context(|| format!("Stored URL is invalid: {}", document.source))?,
            ),
        };

        self.run(&source, Target::Existing(document)).await
    }

    async fn run(&self, source: &Source, target: Target) -> Result<IngestReport> {
        let strategies = self.strategies();
        let acquired = acquire_with(&strategies, source).await?;

        let text = joined_text(&acquired.pages);
        let char_count = text.chars().count();
        if char_count < self.min_document_chars {
            return Err(ComplianceError::unavailable(
                source.origin(),
                format!(
                    "extracted text is too short ({} characters, need {})",
                    char_count, self.min_document_chars
                ),
            )
            .into());
        }

        let chunks = self.chunker.chunk_pages(&acquired.pages);
        if chunks.is_empty() {
            return Err(ComplianceError::unavailable(source.origin(), "no chunks produced").into());
        }

        let hash = content_hash(&text);

        let (document, reused) = match target {
            Target::Existing(document) => (document, true),
            Target::New(document) => {
                self.store.insert_document(&document)?;
                (document, false)
            }
        };

        self.store
            .replace_chunks(&document.id, &chunks)
            .with_context(|| format!("Failed to store chunks for {}", document.name))?;
        self.store.set_document_hash(&document.id, &hash)?;

        let changed = document.content_hash.as_deref() != Some(hash.as_str());

        tracing::info!(
            document = %document.name,
            strategy = acquired.strategy,
            pages = acquired.pages.len(),
            chunks = chunks.len(),
            changed,
            "Ingested document"
        );

        Ok(IngestReport {
            document_id: document.id,
            name: document.name,
            page_count: acquired.pages.len(),
            chunk_count: chunks.len(),
            content_hash: hash,
            changed,
            reused,
            strategy: acquired.strategy.to_string(),
        })
    }
}

enum Target {
    Existing(DocumentRecord),
    New(DocumentRecord),
}

#[async_trait::async_trait(?Send)]
impl<'a> Reingest for Ingestor<'a> {
    async fn reingest(&self, document_id: &str) -> Result<usize> {
        Ok(self.reingest_document(document_id).await?.chunk_count)
    }
}
