//! Sentence-aware text chunker.
//!
//! Splits extracted document text into overlapping [`Chunk`]s sized by an
//! estimated token budget. Boundaries prefer sentence terminators so that
//! chunks rarely end mid-sentence.
//!
//! # Algorithm
//!
//! 1. Convert `chunk_size_tokens` and `overlap_tokens` to characters using a
//!    4 chars/token ratio.
//! 2. From the cursor, take a candidate end `cursor + size_chars`.
//! 3. If the candidate end is before the end of the text, scan backward from
//!    it to `cursor + size_chars / 2` for `.`, `?` or `!` and end the chunk
//!    just after the first one found.
//! 4. Trim the slice (unless it is pathologically large) and skip it if it
//!    is empty. Empty slices do not consume a chunk index.
//! 5. Advance the cursor by `max(size_chars - overlap_chars, 1)`.
//!
//! Iterations are capped at `len / step + 10` so the loop terminates even
//! under degenerate configuration.
//!
//! All offsets are measured in `char`s, never bytes.
//!
//! # Example
//!
//! ```rust
//! use grounded_core::chunk::{Chunker, ChunkerConfig};
//!
//! let chunker = Chunker::new(ChunkerConfig::default());
//! let chunks = chunker.chunk("doc-123", "Hello world. A short document.").unwrap();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::RagError;
use crate::models::Chunk;

/// Approximate characters-per-token ratio for English text.
pub const CHARS_PER_TOKEN: usize = 4;

/// Documents longer than this many characters are rejected.
pub const MAX_TEXT_CHARS: usize = 10_000_000;

/// Slices at or above this many characters are kept untrimmed.
const TRIM_LIMIT_CHARS: usize = 10_000;

/// Estimate the token count of `text` as `ceil(chars / 4)`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Chunk sizing in tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    pub chunk_size_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size_tokens: 512,
            overlap_tokens: 50,
        }
    }
}

/// Character range of one raw chunk slice, before trimming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub start: usize,
    pub end: usize,
}

/// Deterministic splitter producing overlapping, sentence-aligned chunks.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    fn size_chars(&self) -> usize {
        (self.config.chunk_size_tokens * CHARS_PER_TOKEN).max(1)
    }

    fn step_chars(&self) -> usize {
        let overlap_chars = self.config.overlap_tokens * CHARS_PER_TOKEN;
        self.size_chars().saturating_sub(overlap_chars).max(1)
    }

    /// Split `text` into chunks belonging to `document_id`.
    ///
    /// Chunk indices are contiguous from 0 and each chunk's `token_count` is
    /// estimated from its own trimmed content.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::EmptyInput`](crate::ErrorKind::EmptyInput) if the
    ///   trimmed text is empty.
    /// - [`ErrorKind::SizeLimit`](crate::ErrorKind::SizeLimit) if the text is
    ///   longer than [`MAX_TEXT_CHARS`].
    pub fn chunk(&self, document_id: &str, text: &str) -> Result<Vec<Chunk>, RagError> {
        if text.trim().is_empty() {
            return Err(RagError::empty_input("cannot chunk empty text").with_document(document_id));
        }

        let chars: Vec<char> = text.chars().collect();
        if chars.len() > MAX_TEXT_CHARS {
            return Err(RagError::size_limit(format!(
                "document too large for chunking: {} chars (max {})",
                chars.len(),
                MAX_TEXT_CHARS
            ))
            .with_document(document_id));
        }

        let mut chunks = Vec::new();
        for span in self.spans(&chars) {
            let raw: String = chars[span.start..span.end].iter().collect();
            let content = if span.end - span.start < TRIM_LIMIT_CHARS {
                raw.trim().to_string()
            } else {
                raw
            };
            if content.is_empty() {
                continue;
            }
            chunks.push(make_chunk(document_id, chunks.len() as i64, content));
        }

        Ok(chunks)
    }

    /// Compute raw chunk boundaries over `chars`.
    ///
    /// Every span lies within `0..chars.len()` and spans start at
    /// multiples of the advance step.
    ///
    /// The iteration cap is `len / step + 10`, deliberately not the
    /// size-based `len / size + 10`: with overlap the step is shorter than
    /// the window, and a size-based cap would stop before the text end.
    pub fn spans(&self, chars: &[char]) -> Vec<ChunkSpan> {
        let len = chars.len();
        let size = self.size_chars();
        let step = self.step_chars();
        let max_iterations = len / step + 10;

        let mut spans = Vec::new();
        let mut cursor = 0usize;
        let mut iterations = 0usize;

        while cursor < len && iterations < max_iterations {
            iterations += 1;

            let mut end = (cursor + size).min(len);
            if end < len {
                if let Some(brk) = find_sentence_break(chars, end, cursor + size / 2) {
                    if brk > cursor {
                        end = brk;
                    }
                }
            }

            spans.push(ChunkSpan { start: cursor, end });
            cursor += step;
        }

        spans
    }
}

/// Scan backward from `target` (inclusive) to `min` for a sentence
/// terminator and return the position just after it.
fn find_sentence_break(chars: &[char], target: usize, min: usize) -> Option<usize> {
    let target = target.min(chars.len().saturating_sub(1));
    (min..=target)
        .rev()
        .find(|&i| matches!(chars[i], '.' | '?' | '!'))
        .map(|i| (i + 1).min(chars.len()))
}

fn make_chunk(document_id: &str, index: i64, content: String) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        token_count: estimate_tokens(&content) as i64,
        content,
        vector_id: None,
        embedding_model: None,
        metadata: Some(serde_json::json!({ "hash": hash })),
    }
}
