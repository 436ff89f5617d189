//! Core data models used throughout Corpus Harness.
//!
//! These types represent the documents, chunks, and index entries that flow
//! through the ingestion and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Prefix carried by every document identifier derived from a local file.
pub const LOCAL_ID_PREFIX: &str = "local_";

/// A source document read from the corpus.
///
/// Re-derived on every scan; only its chunks are persisted.
#[derive(Debug, Clone)]
pub struct Document {
    /// Stable identifier, see [`document_id_for`].
    pub id: String,
    pub title: String,
    pub text: String,
    pub source_path: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub modified_at: Option<DateTime<Utc>>,
    /// SHA-256 of `text`. Stored for change detection; not used by the skip decision.
    pub content_hash: String,
}

/// A chunk of a document's text. The unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// Typed metadata stored alongside each embedding.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EntryMetadata {
    pub title: Option<String>,
    pub source_path: Option<String>,
    pub total_chunks: i64,
    pub model: String,
}

/// One row of the corpus index: a chunk, its vector, and its metadata.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
    pub metadata: EntryMetadata,
}

impl IndexEntry {
    pub fn id(&self) -> &str {
        &self.chunk.id
    }

    pub fn document_id(&self) -> &str {
        &self.chunk.document_id
    }
}

/// A chunk returned from similarity search together with its score.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub metadata: EntryMetadata,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
}

/// Chunk identifier for the `index`-th chunk of `document_id`.
///
/// The `_chunk_<digits>` suffix keeps identifiers unique across documents
/// as long as document identifiers are unique.
pub fn chunk_id_for(document_id: &str, index: i64) -> String {
    format!("{}_chunk_{}", document_id, index)
}

/// Document identifier for a file at `relative_path` (relative to the corpus
/// root, `/`-separated).
///
/// The extension of the final component is dropped:
/// `history/rome.txt` → `local_history/rome`.
///
/// ```rust
/// use corpus_harness_core::models::document_id_for;
///
/// assert_eq!(document_id_for("rome_history.txt"), "local_rome_history");
/// assert_eq!(document_id_for("antiquity/egypt.pdf"), "local_antiquity/egypt");
/// ```
pub fn document_id_for(relative_path: &str) -> String {
    let (dir, file) = match relative_path.rfind('/') {
        Some(pos) => (&relative_path[..=pos], &relative_path[pos + 1..]),
        None => ("", relative_path),
    };
    let stem = match file.rfind('.') {
        Some(pos) if pos > 0 => &file[..pos],
        _ => file,
    };
    format!("{}{}{}", LOCAL_ID_PREFIX, dir, stem)
}

/// Human-readable title from a file stem.
///
/// `_` and `-` become spaces and each word is capitalised.
pub fn title_from_stem(stem: &str) -> String {
    stem.replace(['_', '-'], " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(|c| c.to_lowercase()))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_id_strips_extension() {
        assert_eq!(document_id_for("rome.txt"), "local_rome");
        assert_eq!(document_id_for("a/b/c.epub"), "local_a/b/c");
    }

    #[test]
    fn test_document_id_keeps_inner_dots() {
        assert_eq!(document_id_for("vol.1.pdf"), "local_vol.1");
        assert_eq!(document_id_for(".hidden"), "local_.hidden");
        assert_eq!(document_id_for("noext"), "local_noext");
    }

    #[test]
    fn test_document_id_deterministic() {
        assert_eq!(document_id_for("x/y.md"), document_id_for("x/y.md"));
    }

    #[test]
    fn test_chunk_id_format() {
        assert_eq!(chunk_id_for("local_rome", 3), "local_rome_chunk_3");
    }

    #[test]
    fn test_title_from_stem() {
        assert_eq!(title_from_stem("the_roman-empire"), "The Roman Empire");
        assert_eq!(title_from_stem("EGYPT"), "Egypt");
        assert_eq!(title_from_stem("__"), "");
    }
}
