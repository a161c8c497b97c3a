//! PDF text extraction using `pdf-extract`

use super::{normalize_text, AcquisitionStrategy, Page, Source};
use anyhow::{Context, Result};

/// Extract normalized pages from PDF bytes.
///
/// `pdf-extract` emits a form feed between pages; text without any form
/// feed is treated as a single page.
pub fn extract_pages(bytes: &[u8]) -> Result<Vec<Page>> {
    let text = pdf_extract::extract_text_from_mem(bytes).context("Failed to extract text from PDF")?;
    Ok(split_pages(&text))
}

/// Split extracted text on form feeds into numbered, normalized pages
pub fn split_pages(text: &str) -> Vec<Page> {
    text.split('\x0C')
        .enumerate()
        .map(|(i, raw)| Page::new(i + 1, normalize_text(raw)))
        .filter(|page| !page.text.is_empty())
        .collect()
}

/// Text extraction straight from the PDF bytes
pub struct PdfTextStrategy;

#[async_trait::async_trait]
impl AcquisitionStrategy for PdfTextStrategy {
    fn name(&self) -> &'static str {
        "pdf-text"
    }

    fn supports(&self, source: &Source) -> bool {
        matches!(source, Source::Pdf { .. })
    }

    async fn acquire(&self, source: &Source) -> Result<Vec<Page>> {
        let Source::Pdf { bytes, .. } = source else {
            anyhow::bail!("not a PDF source");
        };

        // Parsing is CPU-bound and may panic on hostile input.
        let bytes = bytes.clone();
        tokio::task::spawn_blocking(move || extract_pages(&bytes))
            .await
            .context("PDF extraction task failed")?
    }
}
