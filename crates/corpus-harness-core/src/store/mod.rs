//! Corpus index abstraction.
//!
//! The [`CorpusIndex`] trait defines the storage operations needed by the
//! ingestion synchronizer and the retriever, enabling pluggable backends
//! (SQLite in the app crate, [`memory::InMemoryIndex`] here).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::IndexError;
use crate::models::{IndexEntry, ScoredChunk};

/// Result of writing a single [`IndexEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No entry existed for the chunk id.
    Inserted,
    /// An entry existed with different content and was replaced in place.
    Updated,
    /// An identical entry already existed; nothing was written.
    Unchanged,
}

/// Abstract vector store keyed by chunk id.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`existing_document_ids`](CorpusIndex::existing_document_ids) | Snapshot of indexed document ids |
/// | [`upsert`](CorpusIndex::upsert) | Idempotent write of one entry |
/// | [`upsert_many`](CorpusIndex::upsert_many) | Write all entries of one document |
/// | [`search`](CorpusIndex::search) | Cosine similarity top-k |
/// | [`remove_by_document_id`](CorpusIndex::remove_by_document_id) | Delete a document's entries |
/// | [`entry_count`](CorpusIndex::entry_count) | Number of stored entries |
#[async_trait]
pub trait CorpusIndex: Send + Sync {
    /// Every document id with at least one entry, read in a single
    /// consistent operation.
    async fn existing_document_ids(&self) -> Result<BTreeSet<String>, IndexError>;

    /// Insert or replace the entry for `entry.chunk.id`.
    ///
    /// Writing an entry identical to the stored one is a no-op. There is
    /// never more than one entry per chunk id.
    async fn upsert(&self, entry: &IndexEntry) -> Result<UpsertOutcome, IndexError>;

    /// Write a batch of entries.
    ///
    /// The default writes them one by one; backends with transactions
    /// should override this so the batch is all-or-nothing.
    async fn upsert_many(&self, entries: &[IndexEntry]) -> Result<Vec<UpsertOutcome>, IndexError> {
        let mut outcomes = Vec::with_capacity(entries.len());
        for entry in entries {
            outcomes.push(self.upsert(entry).await?);
        }
        Ok(outcomes)
    }

    /// Up to `k` entries most similar to `query`, highest score first.
    /// Equal scores are ordered by chunk id ascending.
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IndexError>;

    /// Remove every entry whose chunk belongs to `document_id`.
    /// Returns the number of entries removed.
    async fn remove_by_document_id(&self, document_id: &str) -> Result<u64, IndexError>;

    async fn entry_count(&self) -> Result<u64, IndexError>;
}

/// Whether two entries for the same chunk id carry the same content.
pub fn same_content(a: &IndexEntry, b: &IndexEntry) -> bool {
    a.chunk == b.chunk && a.metadata == b.metadata && a.embedding == b.embedding
}

/// Sort scored hits by descending score, then chunk id, and keep `k`.
pub fn rank(mut hits: Vec<ScoredChunk>, k: usize) -> Vec<ScoredChunk> {
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    hits.truncate(k);
    hits
}
