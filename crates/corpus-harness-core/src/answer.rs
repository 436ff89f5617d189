//! Answer composition over retrieved chunks.
//!
//! The LLM call itself is an external capability behind [`AnswerComposer`].
//! [`answer_question`] orchestrates retrieval, context formatting, and the
//! canned fallbacks: an empty retrieval never reaches the composer, and a
//! composer failure is replaced by a fixed message so callers always get an
//! [`Answer`].

use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

use crate::error::{ComposeError, RetrieveError};
use crate::models::ScoredChunk;
use crate::retrieve::Retriever;

/// Returned when retrieval finds nothing to ground an answer on.
pub const NO_RELEVANT_INFO: &str =
    "I could not find relevant information for your question in the indexed books. \
     Try rephrasing the question or adding more books to the corpus.";

/// Returned when the composer fails.
pub const COMPOSER_UNAVAILABLE: &str =
    "An answer could not be generated right now. The sources below were retrieved for your question.";

/// Context passages handed to the composer at most.
pub const MAX_CONTEXT_PASSAGES: usize = 5;

/// Characters of chunk text kept in a source preview.
pub const PREVIEW_CHARS: usize = 200;

/// External capability: (question, context passages) → answer text.
#[async_trait]
pub trait AnswerComposer: Send + Sync {
    async fn complete(&self, question: &str, context: &[ScoredChunk]) -> Result<String, ComposeError>;
}

/// Composer used when no LLM is configured. Always fails.
pub struct DisabledComposer;

#[async_trait]
impl AnswerComposer for DisabledComposer {
    async fn complete(&self, _question: &str, _context: &[ScoredChunk]) -> Result<String, ComposeError> {
        Err(ComposeError::Disabled)
    }
}

/// A source shown alongside an answer.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub document_id: String,
    pub title: String,
    /// 1-based passage number within the document.
    pub passage: i64,
    pub preview: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    /// True when `answer` is one of the canned messages.
    pub fallback: bool,
}

/// Render passages as the numbered context block given to a composer.
///
/// ```rust
/// # use corpus_harness_core::answer::format_context;
/// assert_eq!(format_context(&[]), "");
/// ```
pub fn format_context(passages: &[ScoredChunk]) -> String {
    passages
        .iter()
        .take(MAX_CONTEXT_PASSAGES)
        .enumerate()
        .map(|(i, p)| format!("[Source {} - {}]:\n{}", i + 1, display_title(p), p.chunk.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Source references for the top passages, with text previews.
pub fn sources_for(passages: &[ScoredChunk]) -> Vec<SourceRef> {
    passages
        .iter()
        .take(MAX_CONTEXT_PASSAGES)
        .map(|p| SourceRef {
            document_id: p.chunk.document_id.clone(),
            title: display_title(p),
            passage: p.chunk.chunk_index + 1,
            preview: preview(&p.chunk.text),
            score: p.score,
        })
        .collect()
}

fn display_title(p: &ScoredChunk) -> String {
    p.metadata
        .title
        .clone()
        .unwrap_or_else(|| p.chunk.document_id.clone())
}

fn preview(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Retrieve context for `question` and compose an answer.
///
/// Retrieval errors (including `k <= 0`) are returned; composer errors are
/// not.
pub async fn answer_question(
    retriever: &Retriever,
    composer: &dyn AnswerComposer,
    question: &str,
    k: Option<i64>,
) -> Result<Answer, RetrieveError> {
    let passages = retriever.search(question, k).await?;

    if passages.is_empty() {
        return Ok(Answer {
            answer: NO_RELEVANT_INFO.to_string(),
            sources: Vec::new(),
            fallback: true,
        });
    }

    let context = &passages[..passages.len().min(MAX_CONTEXT_PASSAGES)];
    let sources = sources_for(context);

    match composer.complete(question, context).await {
        Ok(answer) => Ok(Answer {
            answer: answer.trim().to_string(),
            sources,
            fallback: false,
        }),
        Err(e) => {
            warn!(error = %e, "answer composer failed, using canned answer");
            Ok(Answer {
                answer: COMPOSER_UNAVAILABLE.to_string(),
                sources,
                fallback: true,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::models::{chunk_id_for, Chunk, EntryMetadata, IndexEntry};
    use crate::store::memory::InMemoryIndex;
    use crate::store::CorpusIndex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct EchoComposer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AnswerComposer for EchoComposer {
        async fn complete(&self, question: &str, context: &[ScoredChunk]) -> Result<String, ComposeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!(" {} | {} ", question, format_context(context)))
        }
    }

    fn scored(doc: &str, index: i64, text: &str, title: Option<&str>) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                id: chunk_id_for(doc, index),
                document_id: doc.to_string(),
                chunk_index: index,
                text: text.to_string(),
                hash: String::new(),
            },
            metadata: EntryMetadata {
                title: title.map(str::to_string),
                ..Default::default()
            },
            score: 0.5,
        }
    }

    async fn seeded_retriever() -> Retriever {
        let embedder = HashingEmbedder::new(128);
        let index = InMemoryIndex::new();
        let text = "The Roman Empire was ruled from Rome by emperors.";
        index
            .upsert(&IndexEntry {
                chunk: Chunk {
                    id: chunk_id_for("local_rome", 0),
                    document_id: "local_rome".to_string(),
                    chunk_index: 0,
                    text: text.to_string(),
                    hash: String::new(),
                },
                embedding: embedder.embed_one(text),
                metadata: EntryMetadata {
                    title: Some("Rome".to_string()),
                    source_path: None,
                    total_chunks: 1,
                    model: "hash-v1".to_string(),
                },
            })
            .await
            .unwrap();
        Retriever::new(Arc::new(index), Arc::new(embedder))
    }

    #[test]
    fn test_format_context_numbers_sources() {
        let ctx = format_context(&[
            scored("local_a", 0, "alpha", Some("Book A")),
            scored("local_b", 2, "beta", None),
        ]);
        assert_eq!(ctx, "[Source 1 - Book A]:\nalpha\n\n[Source 2 - local_b]:\nbeta");
    }

    #[test]
    fn test_sources_preview_and_passage_number() {
        let long = "x".repeat(250);
        let sources = sources_for(&[scored("local_a", 3, &long, Some("A"))]);
        assert_eq!(sources[0].passage, 4);
        assert_eq!(sources[0].preview.len(), PREVIEW_CHARS + 3);
        assert!(sources[0].preview.ends_with("..."));
    }

    #[test]
    fn test_sources_capped() {
        let passages: Vec<ScoredChunk> = (0..8).map(|i| scored("local_a", i, "t", None)).collect();
        assert_eq!(sources_for(&passages).len(), MAX_CONTEXT_PASSAGES);
    }

    #[tokio::test]
    async fn test_empty_retrieval_skips_composer() {
        let retriever = Retriever::new(Arc::new(InMemoryIndex::new()), Arc::new(HashingEmbedder::new(8)));
        let composer = EchoComposer {
            calls: AtomicUsize::new(0),
        };
        let answer = answer_question(&retriever, &composer, "Who ruled Rome?", None)
            .await
            .unwrap();
        assert_eq!(answer.answer, NO_RELEVANT_INFO);
        assert!(answer.fallback);
        assert!(answer.sources.is_empty());
        assert_eq!(composer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_composer_failure_uses_canned_answer() {
        let retriever = seeded_retriever().await;
        let answer = answer_question(&retriever, &DisabledComposer, "Who ruled Rome?", Some(3))
            .await
            .unwrap();
        assert_eq!(answer.answer, COMPOSER_UNAVAILABLE);
        assert!(answer.fallback);
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].title, "Rome");
    }

    #[tokio::test]
    async fn test_composer_success() {
        let retriever = seeded_retriever().await;
        let composer = EchoComposer {
            calls: AtomicUsize::new(0),
        };
        let answer = answer_question(&retriever, &composer, "Who ruled Rome?", None)
            .await
            .unwrap();
        assert!(!answer.fallback);
        assert!(answer.answer.starts_with("Who ruled Rome? | [Source 1 - Rome]"));
        assert_eq!(composer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_k_is_an_error() {
        let retriever = seeded_retriever().await;
        let result = answer_question(&retriever, &DisabledComposer, "q", Some(0)).await;
        assert!(matches!(result, Err(RetrieveError::InvalidArgument(_))));
    }
}
