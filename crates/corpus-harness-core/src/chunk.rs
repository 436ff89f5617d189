//! Paragraph-boundary text chunker with overlap.
//!
//! Splits document text into [`Chunk`]s that respect a configurable
//! `max_tokens` limit. Splitting occurs on paragraph boundaries (`\n\n`)
//! where possible. The tail of each emitted chunk (up to `overlap_tokens`)
//! is carried into the start of the next one so a passage that straddles a
//! boundary is still retrievable as a whole.
//!
//! Chunk identifiers are derived from the document identifier and the chunk
//! index (see [`chunk_id_for`]), so re-chunking the same text yields the
//! same identifiers.
//!
//! # Algorithm
//!
//! 1. Convert `max_tokens` / `overlap_tokens` to characters at 4 chars/token.
//! 2. Split text on `\n\n` paragraph boundaries.
//! 3. Accumulate paragraphs into a buffer until adding the next paragraph
//!    would exceed `max_chars`, then flush the buffer as a chunk and seed the
//!    next buffer with the flushed chunk's tail.
//! 4. A single paragraph longer than `max_chars` is hard-split at the nearest
//!    newline or space; consecutive pieces overlap by `overlap_chars`.
//! 5. At least one chunk is returned per document (even for empty text).
//!
//! # Example
//!
//! ```rust
//! use corpus_harness_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("local_rome", "Hello world.\n\nSecond paragraph.", 250, 50);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].id, "local_rome_chunk_0");
//! ```

use sha2::{Digest, Sha256};

use crate::models::{chunk_id_for, Chunk};

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split text into overlapping chunks, respecting `max_tokens`.
///
/// `overlap_tokens` is clamped below `max_tokens`. Chunk indices are
/// contiguous from 0 and each chunk's `hash` is the SHA-256 of its text.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Vec<Chunk> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let overlap_chars = (overlap_tokens * CHARS_PER_TOKEN).min(max_chars / 2);

    let mut chunker = Chunker {
        document_id,
        chunks: Vec::new(),
    };

    if text.trim().is_empty() {
        chunker.push(text.trim());
        return chunker.chunks;
    }

    let mut buf = String::new();
    // Length of the overlap carried into `buf`; a buffer holding only
    // carried text is never flushed on its own.
    let mut carried = 0usize;

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        if trimmed.len() > max_chars {
            if buf.len() > carried {
                chunker.push(&buf);
            }
            buf.clear();

            let tail = chunker.hard_split(trimmed, max_chars, overlap_chars);
            buf.push_str(tail);
            carried = buf.len();
            continue;
        }

        let would_be = if buf.is_empty() {
            trimmed.len()
        } else {
            buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars {
            if buf.len() > carried {
                chunker.push(&buf);
                let tail = overlap_tail(&buf, overlap_chars).to_string();
                buf = tail;
                carried = buf.len();
            }
            if !buf.is_empty() && buf.len() + 2 + trimmed.len() > max_chars {
                buf.clear();
                carried = 0;
            }
        }

        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(trimmed);
    }

    if buf.len() > carried || chunker.chunks.is_empty() {
        chunker.push(buf.trim());
    }

    chunker.chunks
}

struct Chunker<'a> {
    document_id: &'a str,
    chunks: Vec<Chunk>,
}

impl Chunker<'_> {
    fn push(&mut self, text: &str) {
        let index = self.chunks.len() as i64;
        self.chunks.push(make_chunk(self.document_id, index, text));
    }

    /// Emit `para` as overlapping pieces of at most `max_chars` and return
    /// the overlap tail of the final piece.
    fn hard_split<'p>(&mut self, para: &'p str, max_chars: usize, overlap_chars: usize) -> &'p str {
        let mut start = 0usize;
        loop {
            let remaining = &para[start..];
            if remaining.len() <= max_chars {
                let piece = remaining.trim();
                if !piece.is_empty() {
                    self.push(piece);
                }
                return overlap_tail(piece, overlap_chars);
            }

            let limit = snap_to_char_boundary(remaining, max_chars);
            let split = remaining[..limit]
                .rfind('\n')
                .or_else(|| remaining[..limit].rfind(' '))
                .map(|pos| pos + 1)
                .unwrap_or(limit);
            let split = if split == 0 {
                next_char_boundary(remaining, 0)
            } else {
                split
            };

            let piece = remaining[..split].trim();
            if !piece.is_empty() {
                self.push(piece);
            }

            let end = start + split;
            let back = overlap_tail(&para[start..end], overlap_chars).len();
            let next = end - back;
            // Always make progress, even when the overlap spans the whole piece.
            start = if next > start { next } else { end };
        }
    }
}

/// The last `overlap_chars` bytes of `text`, moved forward to a word start.
fn overlap_tail(text: &str, overlap_chars: usize) -> &str {
    if overlap_chars == 0 || text.is_empty() {
        return "";
    }
    if text.len() <= overlap_chars {
        return text;
    }
    let mut from = text.len() - overlap_chars;
    while from < text.len() && !text.is_char_boundary(from) {
        from += 1;
    }
    let window = &text[from..];
    match window.find(char::is_whitespace) {
        Some(pos) => window[pos..].trim_start(),
        None => window,
    }
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn next_char_boundary(s: &str, index: usize) -> usize {
    s[index..]
        .char_indices()
        .nth(1)
        .map(|(i, _)| index + i)
        .unwrap_or(s.len())
}

/// Create a single [`Chunk`] with a derived identifier and SHA-256 content hash.
fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: chunk_id_for(document_id, index),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
