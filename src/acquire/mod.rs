//! Content acquisition
//!
//! Turns a source (a PDF buffer or a website URL) into ordered pages of
//! normalized text. Acquisition is expressed as an ordered list of
//! strategies tried in sequence; the first one that yields non-empty pages
//! wins, and only when every strategy fails is the source reported as
//! unavailable.

pub mod pdf;
pub mod web;

pub use pdf::PdfTextStrategy;
pub use web::{
    CrawlOptions, CrawlStrategy, CrawledPage, Crawler, HttpFetcher, PageFetcher,
    SinglePageStrategy,
};

use crate::error::ComplianceError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// Compute a stable hash for content
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Collapse runs of horizontal whitespace and blank lines.
///
/// Single line breaks survive so the chunker can still cut on them.
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;

    for line in text.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(&collapsed);
        out.push('\n');
    }

    out.trim().to_string()
}

/// What kind of source a document came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Pdf,
    Url,
}

impl SourceKind {
    /// MIME classifier stored with the document
    pub fn mime_type(&self) -> &'static str {
        match self {
            SourceKind::Pdf => "application/pdf",
            SourceKind::Url => "text/html",
        }
    }

    pub fn from_mime_type(mime: &str) -> Option<Self> {
        match mime {
            "application/pdf" => Some(SourceKind::Pdf),
            "text/html" => Some(SourceKind::Url),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Pdf => write!(f, "pdf"),
            SourceKind::Url => write!(f, "url"),
        }
    }
}

/// A source to acquire text from
#[derive(Debug, Clone)]
pub enum Source {
    /// Raw PDF bytes, optionally with the path they were read from
    Pdf {
        name: String,
        bytes: Vec<u8>,
        path: Option<String>,
    },
    /// A website to crawl starting at this URL
    Url(Url),
}

impl Source {
    pub fn kind(&self) -> SourceKind {
        match self {
            Source::Pdf { .. } => SourceKind::Pdf,
            Source::Url(_) => SourceKind::Url,
        }
    }

    /// Where the content came from (path or URL), used for re-ingestion
    pub fn origin(&self) -> String {
        match self {
            Source::Pdf { path, name, .. } => path.clone().unwrap_or_else(|| name.clone()),
            Source::Url(url) => url.to_string(),
        }
    }

    /// Display name for the document record
    pub fn display_name(&self) -> String {
        match self {
            Source::Pdf { name, .. } => name.clone(),
            Source::Url(url) => url.host_str().unwrap_or(url.as_str()).to_string(),
        }
    }
}

/// One page of acquired text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// 1-based page number (crawl order for websites)
    pub number: usize,
    pub title: Option<String>,
    pub url: Option<String>,
    pub text: String,
}

impl Page {
    pub fn new(number: usize, text: impl Into<String>) -> Self {
        Self {
            number,
            title: None,
            url: None,
            text: text.into(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// Join page texts the way they are hashed and measured
pub fn joined_text(pages: &[Page]) -> String {
    pages
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// A single way of turning a source into pages
#[async_trait::async_trait]
pub trait AcquisitionStrategy: Send + Sync {
    /// Strategy name used in logs and failure reports
    fn name(&self) -> &'static str;

    /// Whether this strategy can handle the source at all
    fn supports(&self, source: &Source) -> bool;

    /// Acquire pages from the source
    async fn acquire(&self, source: &Source) -> Result<Vec<Page>>;
}

/// Pages acquired by a strategy
#[derive(Debug, Clone)]
pub struct Acquired {
    pub pages: Vec<Page>,
    /// Name of the strategy that succeeded
    pub strategy: &'static str,
}

/// Try each supporting strategy in order until one yields content
pub async fn acquire_with(
    strategies: &[Box<dyn AcquisitionStrategy + '_>],
    source: &Source,
) -> Result<Acquired> {
    let mut failures = Vec::new();

    for strategy in strategies.iter().filter(|s| s.supports(source)) {
        match strategy.acquire(source).await {
            Ok(pages) => {
                let pages: Vec<Page> = pages
                    .into_iter()
                    .filter(|p| !p.text.trim().is_empty())
                    .collect();

                if pages.is_empty() {
                    tracing::warn!(strategy = strategy.name(), "Strategy produced no content");
                    failures.push(format!("{}: no content", strategy.name()));
                    continue;
                }

                tracing::debug!(
                    strategy = strategy.name(),
                    pages = pages.len(),
                    "Acquired content"
                );
                return Ok(Acquired {
                    pages,
                    strategy: strategy.name(),
                });
            }
            Err(e) => {
                tracing::warn!(strategy = strategy.name(), "Acquisition failed: {:#}", e);
                failures.push(format!("{}: {:#}", strategy.name(), e));
            }
        }
    }

    if failures.is_empty() {
        failures.push("no acquisition strategy supports this source".to_string());
    }

    Err(ComplianceError::unavailable(source.origin(), failures.join("; ")).into())
}
