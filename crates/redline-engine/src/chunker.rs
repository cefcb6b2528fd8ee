//! Document chunking for the transform service's input limits.
//!
//! Splits long text into token-bounded chunks, preferring natural boundaries
//! (paragraph, line, sentence, word) near the end of each window and falling
//! back to a hard cut. Every chunk after the first is prefixed with the tail
//! of the previous one so the transform call keeps cross-chunk context.
//!
//! Positions are byte offsets into the source text and always land on char
//! boundaries.

use serde::{Deserialize, Serialize};

use crate::constants::{defaults, layout::CHARS_PER_TOKEN};

/// Configuration for chunking behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkConfig {
    /// Token ceiling for a single chunk
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Bytes of the previous chunk prepended to the next one
    #[serde(default = "default_overlap_size")]
    pub overlap_size: usize,
}

fn default_max_tokens() -> usize {
    defaults::MAX_TOKENS
}

fn default_overlap_size() -> usize {
    defaults::OVERLAP_SIZE
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_size: default_overlap_size(),
        }
    }
}

/// A bounded slice of a larger document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentChunk {
    pub id: String,
    /// Overlap (if any) followed by the chunk's own text
    pub content: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    /// Start of the chunk's own text in the source
    pub start_position: usize,
    /// End (exclusive) of the chunk's own text in the source
    pub end_position: usize,
    /// Text carried over from the previous chunk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlap: Option<String>,
}

/// Rough token estimate: one token per four bytes, rounded up
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN)
}

/// Split `text` into chunks no larger than `config.max_tokens`
///
/// Empty input yields no chunks. Input within the limit yields exactly one
/// chunk spanning the whole text.
pub fn chunk_document(text: &str, config: &ChunkConfig) -> Vec<DocumentChunk> {
    if text.is_empty() {
        return Vec::new();
    }

    if estimate_tokens(text) <= config.max_tokens {
        return vec![DocumentChunk {
            id: chunk_id(0),
            content: text.to_string(),
            chunk_index: 0,
            total_chunks: 1,
            start_position: 0,
            end_position: text.len(),
            overlap: None,
        }];
    }

    let window = config.max_tokens.max(1) * CHARS_PER_TOKEN;
    let mut chunks: Vec<DocumentChunk> = Vec::new();
    let mut start = 0;
    let mut previous_start = 0;

    while start < text.len() {
        let remaining = &text[start..];
        let end = if remaining.len() <= window {
            text.len()
        } else {
            start + find_split_point(remaining, window)
        };

        let overlap = if chunks.is_empty() || config.overlap_size == 0 {
            None
        } else {
            let from = ceil_char_boundary(text, start.saturating_sub(config.overlap_size).max(previous_start));
            let tail = &text[from..start];
            (!tail.is_empty()).then(|| tail.to_string())
        };

        let body = &text[start..end];
        let content = match &overlap {
            Some(tail) => format!("{}{}", tail, body),
            None => body.to_string(),
        };

        chunks.push(DocumentChunk {
            id: chunk_id(chunks.len()),
            content,
            chunk_index: chunks.len(),
            total_chunks: 0,
            start_position: start,
            end_position: end,
            overlap,
        });

        previous_start = start;
        start = end;
    }

    let total = chunks.len();
    for chunk in &mut chunks {
        chunk.total_chunks = total;
    }

    log::debug!(
        "Chunked {} bytes (~{} tokens) into {} chunks",
        text.len(),
        estimate_tokens(text),
        total
    );

    chunks
}

fn chunk_id(index: usize) -> String {
    format!("chunk-{}", index)
}

/// Choose where to end the next chunk within `remaining`
///
/// Returns a byte offset in `1..=window` on a char boundary.
fn find_split_point(remaining: &str, window: usize) -> usize {
    let limit = floor_char_boundary(remaining, window);
    if limit == 0 {
        // Window smaller than the first character: take that character whole
        return remaining.chars().next().map(char::len_utf8).unwrap_or(remaining.len());
    }

    let slice = &remaining[..limit];

    if let Some(i) = slice.rfind("\n\n") {
        if i > 0 && i * 100 >= limit * 50 {
            return i + 2;
        }
    }
    if let Some(i) = slice.rfind('\n') {
        if i * 100 >= limit * 70 {
            return i + 1;
        }
    }
    if let Some(i) = slice.rfind(". ") {
        if i * 100 >= limit * 70 {
            return i + 2;
        }
    }
    if let Some(i) = slice.rfind(' ') {
        if i * 100 >= limit * 80 {
            return i + 1;
        }
    }

    log::debug!("No natural boundary in {}-byte window, hard cut", limit);
    limit
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(s: &str, mut index: usize) -> usize {
    while index < s.len() && !s.is_char_boundary(index) {
        index += 1;
    }
    index
}
