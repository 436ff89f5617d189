//! Query commands: `corpus search` and `corpus ask`.
//!
//! Both embed the query with the configured provider and rank the stored
//! chunks by cosine similarity through the core [`Retriever`].

use std::sync::Arc;

use anyhow::{bail, Result};

use corpus_harness_core::answer::{answer_question, DisabledComposer};
use corpus_harness_core::retrieve::Retriever;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::sqlite_index::SqliteIndex;

const EXCERPT_CHARS: usize = 240;

async fn open_retriever(config: &Config) -> Result<(Arc<SqliteIndex>, Retriever)> {
    if !config.embedding.is_enabled() {
        bail!("Search requires embeddings. Set [embedding] provider in config.");
    }
    let index = Arc::new(SqliteIndex::open(config).await?);
    let embedder = create_embedder(&config.embedding)?;
    let retriever =
        Retriever::new(index.clone(), embedder).with_default_k(config.retrieval.default_k);
    Ok((index, retriever))
}

pub async fn run_search(config: &Config, query: &str, k: Option<i64>) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let (index, retriever) = open_retriever(config).await?;
    let hits = retriever.search(query, k).await;
    index.close().await;
    let hits = hits?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        let title = hit
            .metadata
            .title
            .as_deref()
            .unwrap_or(hit.chunk.document_id.as_str());
        println!("{}. [{:.3}] {}", i + 1, hit.score, title);
        if let Some(ref path) = hit.metadata.source_path {
            println!("    source: {}", path);
        }
        println!(
            "    passage: {} / {}",
            hit.chunk.chunk_index + 1,
            hit.metadata.total_chunks
        );
        println!("    excerpt: \"{}\"", excerpt(&hit.chunk.text));
        println!("    id: {}", hit.chunk.id);
        println!();
    }
    Ok(())
}

/// Retrieve passages for `question` and compose an answer. Without a
/// configured composer the canned answer is printed with its sources.
pub async fn run_ask(config: &Config, question: &str, k: Option<i64>) -> Result<()> {
    let (index, retriever) = open_retriever(config).await?;
    let answer = answer_question(&retriever, &DisabledComposer, question, k).await;
    index.close().await;
    let answer = answer?;

    println!("{}", answer.answer);
    if !answer.sources.is_empty() {
        println!();
        println!("Sources:");
        for (i, source) in answer.sources.iter().enumerate() {
            println!(
                "{}. {} (passage {}, score {:.3})",
                i + 1,
                source.title,
                source.passage,
                source.score
            );
            println!("    {}", source.preview.replace('\n', " "));
        }
    }
    Ok(())
}

fn excerpt(text: &str) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    match flat.char_indices().nth(EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat.to_string(),
    }
}
