//! Splitting extracted pages into bounded chunks
//!
//! Each page is chunked on its own so every chunk carries a single page
//! number. Long pages are cut with a sliding window that prefers to end on a
//! sentence terminator or newline instead of mid-sentence.

use crate::acquire::Page;
use serde::{Deserialize, Serialize};

/// Default target chunk size in characters
pub const DEFAULT_CHUNK_SIZE: usize = 1600;

/// Default overlap between consecutive chunks of one page
pub const DEFAULT_OVERLAP: usize = 200;

/// A natural boundary is only used when it lies at least this far into the window
const BOUNDARY_MIN_RATIO: f64 = 0.7;

/// A contiguous slice of a document's extracted text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    /// Global position of the chunk within its document
    pub index: usize,
    /// Trimmed chunk text, never empty
    pub content: String,
    /// Number of whitespace-separated words
    pub word_count: usize,
    /// Source page (1-based) when known
    pub page_number: Option<usize>,
    /// Character offset where the chunk starts within its page
    pub start_offset: Option<usize>,
    /// Character offset where the chunk ends within its page (exclusive)
    pub end_offset: Option<usize>,
}

impl TextChunk {
    /// Create a new chunk, computing the word count
    pub fn new(
        index: usize,
        content: &str,
        page_number: Option<usize>,
        start_offset: Option<usize>,
        end_offset: Option<usize>,
    ) -> Self {
        Self {
            index,
            content: content.to_string(),
            word_count: content.split_whitespace().count(),
            page_number,
            start_offset,
            end_offset,
        }
    }
}

/// Sliding-window chunker
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    /// Create a chunker; the overlap is clamped below the chunk size
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            overlap: overlap.min(chunk_size - 1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Chunk ordered pages into one globally indexed sequence
    pub fn chunk_pages(&self, pages: &[Page]) -> Vec<TextChunk> {
        let mut chunks = Vec::new();
        for page in pages {
            self.chunk_page(page.number, &page.text, &mut chunks);
        }
        chunks
    }

    fn chunk_page(&self, page_number: usize, text: &str, out: &mut Vec<TextChunk>) {
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return;
        }

        if chars.len() <= self.chunk_size {
            push_chunk(out, page_number, &chars, 0, chars.len());
            return;
        }

        let mut start = 0;
        while start < chars.len() {
            let mut end = (start + self.chunk_size).min(chars.len());

            if end < chars.len() {
                if let Some(boundary) = find_boundary(&chars[start..end]) {
                    if boundary as f64 >= self.chunk_size as f64 * BOUNDARY_MIN_RATIO {
                        end = start + boundary;
                    }
                }
            }

            push_chunk(out, page_number, &chars, start, end);

            if end >= chars.len() {
                break;
            }

            // Step back by the overlap, but always make progress.
            let next = end.saturating_sub(self.overlap);
            start = if next > start { next } else { end };
        }
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP)
    }
}

/// Position just past the last sentence terminator or newline in the window
fn find_boundary(window: &[char]) -> Option<usize> {
    window
        .iter()
        .rposition(|c| matches!(c, '.' | '!' | '?' | '\n'))
        .map(|pos| pos + 1)
}

fn push_chunk(out: &mut Vec<TextChunk>, page_number: usize, chars: &[char], start: usize, end: usize) {
    let slice: String = chars[start..end].iter().collect();
    let content = slice.trim();
    if content.is_empty() {
        return;
    }

    let index = out.len();
    out.push(TextChunk::new(
        index,
        content,
        Some(page_number),
        Some(start),
        Some(end),
    ));
}
