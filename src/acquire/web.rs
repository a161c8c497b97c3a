//! Website acquisition: fetching, HTML extraction and a same-host crawler

use super::{AcquisitionStrategy, Page, Source};
use anyhow::{Context, Result};
use scraper::{ElementRef, Html, Selector};
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use url::Url;

/// Content areas tried in order before falling back to the whole body
const CONTENT_SELECTORS: &[&str] = &[
    "main",
    "article",
    "[role=\"main\"]",
    "#content",
    ".content",
    "#main",
    "body",
];

const BLOCK_SELECTOR: &str = "h1, h2, h3, h4, h5, h6, p, li, blockquote, pre, td, th, dt, dd";

const BLOCK_TAGS: &[&str] = &[
    "h1", "h2", "h3", "h4", "h5", "h6", "p", "li", "blockquote", "pre", "td", "th", "dt", "dd",
];

const ASSET_EXTENSIONS: &[&str] = &[
    ".pdf", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp", ".zip", ".css", ".js", ".xml",
    ".mp4", ".mp3", ".ico", ".woff", ".woff2",
];

/// Source of raw HTML for a URL
#[async_trait::async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch the HTML body of a page
    async fn fetch(&self, url: &Url) -> Result<String>;
}

/// `reqwest`-backed fetcher
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher with a per-request timeout and user agent
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<String> {
        let response = self
            .client
            .get(url.clone())
            .header(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Fetching {} failed with status {}", url, status);
        }

        if let Some(content_type) = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            if !content_type.contains("html") && !content_type.contains("text") {
                anyhow::bail!("Unsupported content type for {}: {}", url, content_type);
            }
        }

        response
            .text()
            .await
            .with_context(|| format!("Failed to read body of {}", url))
    }
}

/// Crawl limits
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    /// Maximum number of pages kept
    pub max_pages: usize,
    /// Maximum link depth from the seed (seed is depth 0)
    pub max_depth: usize,
    /// Pages with less extracted content are treated as navigation boilerplate
    pub min_content_chars: usize,
    /// Pause between consecutive requests
    pub request_delay: Duration,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            max_pages: 10,
            max_depth: 2,
            min_content_chars: 200,
            request_delay: Duration::from_millis(500),
        }
    }
}

/// A page kept by the crawler
#[derive(Debug, Clone, PartialEq)]
pub struct CrawledPage {
    /// Normalized URL (no query or fragment)
    pub url: String,
    pub title: String,
    /// Markdown-ish structured text
    pub content: String,
}

impl CrawledPage {
    fn into_page(self, number: usize) -> Page {
        let text = if self.title.is_empty() {
            self.content
        } else {
            format!("# {}\n\n{}", self.title, self.content)
        };

        let page = Page::new(number, text).with_url(self.url);
        if self.title.is_empty() {
            page
        } else {
            page.with_title(self.title)
        }
    }
}

/// Title, content and outgoing links of one HTML document
#[derive(Debug, Clone, Default)]
pub struct ExtractedPage {
    pub title: String,
    pub content: String,
    pub links: Vec<Url>,
}

/// Strip the fragment and query string; used as the visited-set key
pub fn normalize_url(url: &Url) -> String {
    let mut clean = url.clone();
    clean.set_fragment(None);
    clean.set_query(None);
    clean.to_string()
}

fn looks_like_asset(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    ASSET_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .map(|el| collapse(&el.text().collect::<String>()))
        .find(|text| !text.is_empty())
}

/// Render the block elements of a content area as markdown-ish text
fn render_blocks(root: ElementRef<'_>) -> String {
    let Ok(blocks) = Selector::parse(BLOCK_SELECTOR) else {
        return collapse(&root.text().collect::<String>());
    };

    let mut lines = Vec::new();
    for block in root.select(&blocks) {
        // Nested blocks are rendered as part of their outermost block.
        let nested = block
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|ancestor| BLOCK_TAGS.contains(&ancestor.value().name()));
        if nested {
            continue;
        }

        let text = collapse(&block.text().collect::<String>());
        if text.is_empty() {
            continue;
        }

        let line = match block.value().name() {
            "h1" => format!("# {}", text),
            "h2" => format!("## {}", text),
            "h3" => format!("### {}", text),
            "h4" | "h5" | "h6" => format!("#### {}", text),
            "li" => format!("- {}", text),
            "blockquote" => format!("> {}", text),
            _ => text,
        };
        lines.push(line);
    }

    if lines.is_empty() {
        collapse(&root.text().collect::<String>())
    } else {
        lines.join("\n")
    }
}

/// Extract title, content and links from an HTML document
pub fn extract_page(base: &Url, html: &str) -> ExtractedPage {
    let document = Html::parse_document(html);

    let title = first_text(&document, "title")
        .or_else(|| first_text(&document, "h1"))
        .unwrap_or_default();

    let content = CONTENT_SELECTORS
        .iter()
        .filter_map(|sel| Selector::parse(sel).ok())
        .find_map(|sel| document.select(&sel).next())
        .map(render_blocks)
        .unwrap_or_default();

    let links = match Selector::parse("a[href]") {
        Ok(anchor) => document
            .select(&anchor)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| base.join(href).ok())
            .collect(),
        Err(_) => Vec::new(),
    };

    ExtractedPage {
        title,
        content,
        links,
    }
}

/// Breadth-first crawler restricted to the seed's host
pub struct Crawler<'a> {
    fetcher: &'a dyn PageFetcher,
    options: CrawlOptions,
}

impl<'a> Crawler<'a> {
    pub fn new(fetcher: &'a dyn PageFetcher, options: CrawlOptions) -> Self {
        Self { fetcher, options }
    }

    /// Crawl from the seed, returning at most `max_pages` content pages.
    ///
    /// Individual fetch failures are logged and skipped.
    pub async fn crawl(&self, seed: &Url) -> Vec<CrawledPage> {
        let host = seed.host_str().map(str::to_string);
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(Url, usize)> = VecDeque::new();
        let mut pages = Vec::new();
        let mut fetched_any = false;

        let mut start = seed.clone();
        start.set_fragment(None);
        start.set_query(None);
        queue.push_back((start, 0));

        while let Some((url, depth)) = queue.pop_front() {
            if pages.len() >= self.options.max_pages {
                break;
            }

            let key = normalize_url(&url);
            if !visited.insert(key.clone()) {
                continue;
            }

            if fetched_any && !self.options.request_delay.is_zero() {
                tokio::time::sleep(self.options.request_delay).await;
            }
            fetched_any = true;

            let html = match self.fetcher.fetch(&url).await {
                Ok(html) => html,
                Err(e) => {
                    tracing::warn!(url = %url, "Skipping page: {:#}", e);
                    continue;
                }
            };

            let extracted = extract_page(&url, &html);

            if depth < self.options.max_depth {
                for mut link in extracted.links {
                    if !matches!(link.scheme(), "http" | "https")
                        || link.host_str() != host.as_deref()
                        || looks_like_asset(&link)
                    {
                        continue;
                    }
                    link.set_fragment(None);
                    link.set_query(None);
                    if !visited.contains(link.as_str()) {
                        queue.push_back((link, depth + 1));
                    }
                }
            }

            if extracted.content.chars().count() < self.options.min_content_chars {
                tracing::debug!(url = %url, "Skipping page below content threshold");
                continue;
            }

            tracing::debug!(url = %url, depth, "Crawled page");
            pages.push(CrawledPage {
                url: key,
                title: extracted.title,
                content: extracted.content,
            });
        }

        tracing::info!(seed = %seed, pages = pages.len(), visited = visited.len(), "Crawl finished");
        pages
    }

    /// Fetch and extract just one page, without the content threshold
    pub async fn scrape(&self, url: &Url) -> Result<CrawledPage> {
        let html = self.fetcher.fetch(url).await?;
        let extracted = extract_page(url, &html);

        if extracted.content.trim().is_empty() {
            anyhow::bail!("No readable content at {}", url);
        }

        Ok(CrawledPage {
            url: normalize_url(url),
            title: extracted.title,
            content: extracted.content,
        })
    }
}

/// Breadth-first crawl of the seed's site
pub struct CrawlStrategy<'a> {
    fetcher: &'a dyn PageFetcher,
    options: CrawlOptions,
}

impl<'a> CrawlStrategy<'a> {
    pub fn new(fetcher: &'a dyn PageFetcher, options: CrawlOptions) -> Self {
        Self { fetcher, options }
    }
}

#[async_trait::async_trait]
impl<'a> AcquisitionStrategy for CrawlStrategy<'a> {
    fn name(&self) -> &'static str {
        "crawl"
    }

    fn supports(&self, source: &Source) -> bool {
        matches!(source, Source::Url(_))
    }

    async fn acquire(&self, source: &Source) -> Result<Vec<Page>> {
        let Source::Url(seed) = source else {
            anyhow::bail!("not a URL source");
        };

        let crawled = Crawler::new(self.fetcher, self.options.clone())
            .crawl(seed)
            .await;

        if crawled.is_empty() {
            anyhow::bail!(
                "crawl found no pages with at least {} characters of content",
                self.options.min_content_chars
            );
        }

        Ok(crawled
            .into_iter()
            .enumerate()
            .map(|(i, page)| page.into_page(i + 1))
            .collect())
    }
}

/// Scrape only the seed URL; the fallback when crawling yields nothing
pub struct SinglePageStrategy<'a> {
    fetcher: &'a dyn PageFetcher,
}

impl<'a> SinglePageStrategy<'a> {
    pub fn new(fetcher: &'a dyn PageFetcher) -> Self {
        Self { fetcher }
    }
}

#[async_trait::async_trait]
impl<'a> AcquisitionStrategy for SinglePageStrategy<'a> {
    fn name(&self) -> &'static str {
        "single-page"
    }

    fn supports(&self, source: &Source) -> bool {
        matches!(source, Source::Url(_))
    }

    async fn acquire(&self, source: &Source) -> Result<Vec<Page>> {
        let Source::Url(url) = source else {
            anyhow::bail!("not a URL source");
        };

        let page = Crawler::new(self.fetcher, CrawlOptions::default())
            .scrape(url)
            .await?;
        Ok(vec![page.into_page(1)])
    }
}
