//! In-memory [`CorpusIndex`] for tests and embedding in other programs.
//!
//! Entries live in a `BTreeMap` keyed by chunk id behind `std::sync::RwLock`.
//! Search is brute-force cosine similarity over all stored vectors.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::IndexError;
use crate::models::{IndexEntry, ScoredChunk};

use super::{rank, same_content, CorpusIndex, UpsertOutcome};

/// In-memory corpus index.
#[derive(Default)]
pub struct InMemoryIndex {
    entries: RwLock<BTreeMap<String, IndexEntry>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, IndexEntry>>, IndexError> {
        self.entries
            .read()
            .map_err(|_| IndexError::Read("index lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, IndexEntry>>, IndexError> {
        self.entries
            .write()
            .map_err(|_| IndexError::Write("index lock poisoned".to_string()))
    }

    fn put(map: &mut BTreeMap<String, IndexEntry>, entry: &IndexEntry) -> UpsertOutcome {
        match map.get(entry.id()) {
            Some(existing) if same_content(existing, entry) => UpsertOutcome::Unchanged,
            Some(_) => {
                map.insert(entry.id().to_string(), entry.clone());
                UpsertOutcome::Updated
            }
            None => {
                map.insert(entry.id().to_string(), entry.clone());
                UpsertOutcome::Inserted
            }
        }
    }
}

#[async_trait]
impl CorpusIndex for InMemoryIndex {
    async fn existing_document_ids(&self) -> Result<BTreeSet<String>, IndexError> {
        let map = self.read()?;
        Ok(map.values().map(|e| e.document_id().to_string()).collect())
    }

    async fn upsert(&self, entry: &IndexEntry) -> Result<UpsertOutcome, IndexError> {
        let mut map = self.write()?;
        Ok(Self::put(&mut map, entry))
    }

    async fn upsert_many(&self, entries: &[IndexEntry]) -> Result<Vec<UpsertOutcome>, IndexError> {
        let mut map = self.write()?;
        Ok(entries.iter().map(|e| Self::put(&mut map, e)).collect())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let map = self.read()?;
        let hits = map
            .values()
            .map(|e| ScoredChunk {
                chunk: e.chunk.clone(),
                metadata: e.metadata.clone(),
                score: cosine_similarity(query, &e.embedding),
            })
            .collect();
        Ok(rank(hits, k))
    }

    async fn remove_by_document_id(&self, document_id: &str) -> Result<u64, IndexError> {
        let mut map = self.write()?;
        let before = map.len();
        map.retain(|_, e| e.document_id() != document_id);
        Ok((before - map.len()) as u64)
    }

    async fn entry_count(&self) -> Result<u64, IndexError> {
        Ok(self.read()?.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{chunk_id_for, Chunk, EntryMetadata};

    fn entry(doc: &str, index: i64, text: &str, embedding: Vec<f32>) -> IndexEntry {
        IndexEntry {
            chunk: Chunk {
                id: chunk_id_for(doc, index),
                document_id: doc.to_string(),
                chunk_index: index,
                text: text.to_string(),
                hash: format!("h-{}", text),
            },
            embedding,
            metadata: EntryMetadata {
                title: Some(doc.to_string()),
                source_path: None,
                total_chunks: 1,
                model: "test".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_upsert_outcomes() {
        let index = InMemoryIndex::new();
        let e = entry("local_a", 0, "alpha", vec![1.0, 0.0]);

        assert_eq!(index.upsert(&e).await.unwrap(), UpsertOutcome::Inserted);
        assert_eq!(index.upsert(&e).await.unwrap(), UpsertOutcome::Unchanged);

        let changed = entry("local_a", 0, "alpha two", vec![0.0, 1.0]);
        assert_eq!(index.upsert(&changed).await.unwrap(), UpsertOutcome::Updated);
        assert_eq!(index.entry_count().await.unwrap(), 1);

        let hits = index.search(&[0.0, 1.0], 5).await.unwrap();
        assert_eq!(hits[0].chunk.text, "alpha two");
    }

    #[tokio::test]
    async fn test_existing_document_ids_deduplicates() {
        let index = InMemoryIndex::new();
        index
            .upsert_many(&[
                entry("local_a", 0, "a0", vec![1.0]),
                entry("local_a", 1, "a1", vec![1.0]),
                entry("local_b", 0, "b0", vec![1.0]),
            ])
            .await
            .unwrap();

        let ids = index.existing_document_ids().await.unwrap();
        assert_eq!(
            ids.into_iter().collect::<Vec<_>>(),
            vec!["local_a".to_string(), "local_b".to_string()]
        );
        assert_eq!(index.entry_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_search_orders_by_score_then_id() {
        let index = InMemoryIndex::new();
        index
            .upsert_many(&[
                entry("local_b", 0, "same-b", vec![1.0, 0.0]),
                entry("local_a", 0, "same-a", vec![1.0, 0.0]),
                entry("local_c", 0, "off", vec![0.6, 0.8]),
                entry("local_d", 0, "opposite", vec![-1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = index.search(&[1.0, 0.0], 3).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["local_a_chunk_0", "local_b_chunk_0", "local_c_chunk_0"]);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

        assert!(index.search(&[1.0, 0.0], 0).await.unwrap().is_empty());
        assert_eq!(index.search(&[1.0, 0.0], 10).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_remove_by_document_id() {
        let index = InMemoryIndex::new();
        index
            .upsert_many(&[
                entry("local_a", 0, "a0", vec![1.0]),
                entry("local_a", 1, "a1", vec![1.0]),
                entry("local_ab", 0, "ab0", vec![1.0]),
            ])
            .await
            .unwrap();

        assert_eq!(index.remove_by_document_id("local_a").await.unwrap(), 2);
        assert_eq!(index.remove_by_document_id("local_a").await.unwrap(), 0);
        assert_eq!(index.entry_count().await.unwrap(), 1);
        assert!(index
            .existing_document_ids()
            .await
            .unwrap()
            .contains("local_ab"));
    }
}
