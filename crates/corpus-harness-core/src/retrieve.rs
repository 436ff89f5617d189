//! Query-time retrieval.
//!
//! A [`Retriever`] embeds a query with an [`Embedder`] and asks a
//! [`CorpusIndex`] for the nearest chunks. Failures from either side are
//! returned as [`RetrieveError`]; partial results are never returned.
//!
//! ```rust
//! use std::sync::Arc;
//! use corpus_harness_core::embedding::HashingEmbedder;
//! use corpus_harness_core::retrieve::Retriever;
//! use corpus_harness_core::store::memory::InMemoryIndex;
//!
//! # tokio_test_block_on(async {
//! let retriever = Retriever::new(Arc::new(InMemoryIndex::new()), Arc::new(HashingEmbedder::new(64)));
//! assert!(retriever.retrieve("anything", 5).await.unwrap().is_empty());
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use std::sync::Arc;

use tracing::debug;

use crate::embedding::Embedder;
use crate::error::RetrieveError;
use crate::models::{Chunk, ScoredChunk};
use crate::store::CorpusIndex;

/// Default number of chunks returned when the caller does not choose.
pub const DEFAULT_K: i64 = 5;

#[derive(Clone)]
pub struct Retriever {
    index: Arc<dyn CorpusIndex>,
    embedder: Arc<dyn Embedder>,
    default_k: i64,
}

impl Retriever {
    pub fn new(index: Arc<dyn CorpusIndex>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            index,
            embedder,
            default_k: DEFAULT_K,
        }
    }

    pub fn with_default_k(mut self, k: i64) -> Self {
        self.default_k = k;
        self
    }

    pub fn default_k(&self) -> i64 {
        self.default_k
    }

    /// Scored hits for `query`, most similar first.
    ///
    /// `k = None` uses the configured default. `k <= 0` is rejected before
    /// any embedding work.
    pub async fn search(&self, query: &str, k: Option<i64>) -> Result<Vec<ScoredChunk>, RetrieveError> {
        let k = k.unwrap_or(self.default_k);
        if k <= 0 {
            return Err(RetrieveError::InvalidArgument(format!(
                "k must be a positive integer, got {}",
                k
            )));
        }

        let query_vec = self.embedder.embed_query(query).await?;
        let hits = self.index.search(&query_vec, k as usize).await?;
        debug!(k, hits = hits.len(), "retrieved chunks");
        Ok(hits)
    }

    /// Chunks for `query` in search order.
    pub async fn retrieve(&self, query: &str, k: i64) -> Result<Vec<Chunk>, RetrieveError> {
        let hits = self.search(query, Some(k)).await?;
        Ok(hits.into_iter().map(|h| h.chunk).collect())
    }

    /// Chunk texts for `query` in search order.
    pub async fn retrieve_texts(&self, query: &str, k: i64) -> Result<Vec<String>, RetrieveError> {
        let chunks = self.retrieve(query, k).await?;
        Ok(chunks.into_iter().map(|c| c.text).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_text;
    use crate::error::{EmbeddingError, IndexError};
    use crate::models::{EntryMetadata, IndexEntry};
    use crate::store::memory::InMemoryIndex;
    use crate::embedding::HashingEmbedder;
    use async_trait::async_trait;
    use std::collections::BTreeSet;

    async fn index_texts(index: &InMemoryIndex, embedder: &HashingEmbedder, docs: &[(&str, &str)]) {
        for (doc_id, text) in docs {
            let chunks = chunk_text(doc_id, text, 250, 50);
            let total = chunks.len() as i64;
            let entries: Vec<IndexEntry> = chunks
                .into_iter()
                .map(|chunk| IndexEntry {
                    embedding: embedder.embed_one(&chunk.text),
                    chunk,
                    metadata: EntryMetadata {
                        title: None,
                        source_path: None,
                        total_chunks: total,
                        model: "hash-v1".to_string(),
                    },
                })
                .collect();
            index.upsert_many(&entries).await.unwrap();
        }
    }

    fn retriever(index: Arc<InMemoryIndex>) -> Retriever {
        Retriever::new(index, Arc::new(HashingEmbedder::new(256)))
    }

    #[tokio::test]
    async fn test_non_positive_k_rejected() {
        let r = retriever(Arc::new(InMemoryIndex::new()));
        assert!(matches!(
            r.retrieve("q", 0).await,
            Err(RetrieveError::InvalidArgument(_))
        ));
        assert!(matches!(
            r.retrieve("q", -3).await,
            Err(RetrieveError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_roman_empire_ranks_rome_first() {
        let index = Arc::new(InMemoryIndex::new());
        let embedder = HashingEmbedder::new(256);
        index_texts(
            &index,
            &embedder,
            &[
                ("local_egypt", "Pharaohs built pyramids along the Nile in Egypt."),
                ("local_rome", "The Roman Empire was ruled from Rome by emperors."),
            ],
        )
        .await;

        let r = retriever(index);
        let hits = r.search("Roman Empire", Some(1)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.document_id, "local_rome");
    }

    #[tokio::test]
    async fn test_exact_text_ranks_first_and_scores_non_increasing() {
        let index = Arc::new(InMemoryIndex::new());
        let embedder = HashingEmbedder::new(256);
        index_texts(
            &index,
            &embedder,
            &[
                ("local_a", "Carthage fought three wars against Rome."),
                ("local_b", "The Silk Road linked China with the Mediterranean."),
                ("local_c", "Hannibal crossed the Alps with elephants."),
            ],
        )
        .await;

        let r = retriever(index);
        let hits = r
            .search("Hannibal crossed the Alps with elephants.", Some(3))
            .await
            .unwrap();
        assert_eq!(hits[0].chunk.document_id, "local_c");
        assert!((hits[0].score - 1.0).abs() < 1e-5);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

        let texts = r
            .retrieve_texts("Hannibal crossed the Alps with elephants.", 1)
            .await
            .unwrap();
        assert_eq!(texts, vec!["Hannibal crossed the Alps with elephants.".to_string()]);
    }

    #[tokio::test]
    async fn test_default_k_applies() {
        let index = Arc::new(InMemoryIndex::new());
        let embedder = HashingEmbedder::new(64);
        let docs: Vec<(String, String)> = (0..8)
            .map(|i| (format!("local_{}", i), format!("document number {}", i)))
            .collect();
        let borrowed: Vec<(&str, &str)> = docs.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
        index_texts(&index, &embedder, &borrowed).await;

        let r = retriever(index.clone());
        assert_eq!(r.search("document", None).await.unwrap().len(), 5);
        let r = retriever(index).with_default_k(2);
        assert_eq!(r.search("document", None).await.unwrap().len(), 2);
    }

    struct BrokenIndex;

    #[async_trait]
    impl CorpusIndex for BrokenIndex {
        async fn existing_document_ids(&self) -> Result<BTreeSet<String>, IndexError> {
            Err(IndexError::Read("unavailable".into()))
        }
        async fn upsert(&self, _: &IndexEntry) -> Result<crate::store::UpsertOutcome, IndexError> {
            Err(IndexError::Write("unavailable".into()))
        }
        async fn search(&self, _: &[f32], _: usize) -> Result<Vec<ScoredChunk>, IndexError> {
            Err(IndexError::Read("unavailable".into()))
        }
        async fn remove_by_document_id(&self, _: &str) -> Result<u64, IndexError> {
            Err(IndexError::Write("unavailable".into()))
        }
        async fn entry_count(&self) -> Result<u64, IndexError> {
            Err(IndexError::Read("unavailable".into()))
        }
    }

    struct RefusingEmbedder;

    #[async_trait]
    impl Embedder for RefusingEmbedder {
        fn model_name(&self) -> &str {
            "refusing"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn embed(&self, _: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Err(EmbeddingError::Permanent("malformed input".into()))
        }
    }

    #[tokio::test]
    async fn test_failures_are_explicit() {
        let r = Retriever::new(Arc::new(BrokenIndex), Arc::new(HashingEmbedder::new(8)));
        assert!(matches!(r.retrieve("q", 3).await, Err(RetrieveError::Index(_))));

        let r = Retriever::new(Arc::new(InMemoryIndex::new()), Arc::new(RefusingEmbedder));
        assert!(matches!(r.retrieve("q", 3).await, Err(RetrieveError::Embedding(_))));
    }
}
