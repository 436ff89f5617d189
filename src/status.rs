//! Corpus vs. index overview.
//!
//! Compares the documents currently on disk with the document ids held by
//! the index. Used by `corpus status` to show what the next ingestion run
//! would pick up and what the index still holds for deleted books.

use std::collections::BTreeSet;

use anyhow::{Context, Result};

use corpus_harness_core::store::CorpusIndex;

use crate::config::Config;
use crate::scan::Scanner;
use crate::sqlite_index::SqliteIndex;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    /// Documents found on disk.
    pub on_disk: usize,
    /// On disk and indexed.
    pub indexed: Vec<String>,
    /// On disk, not yet indexed.
    pub missing: Vec<String>,
    /// Indexed, no longer on disk.
    pub orphaned: Vec<String>,
    /// Files the scanner could not identify (e.g. id collisions).
    pub unreadable: usize,
    pub entry_count: u64,
}

/// Build a [`StatusReport`] without reading any file contents.
pub async fn collect_status(scanner: &Scanner, index: &dyn CorpusIndex) -> Result<StatusReport> {
    let walker = scanner.clone();
    let (on_disk, unreadable) = tokio::task::spawn_blocking(move || {
        let mut ids = BTreeSet::new();
        let mut unreadable = 0usize;
        for entry in walker.entries() {
            match entry {
                Ok(e) => {
                    ids.insert(e.id);
                }
                Err(_) => unreadable += 1,
            }
        }
        (ids, unreadable)
    })
    .await
    .context("corpus walk did not complete")?;

    let stored = index.existing_document_ids().await?;
    let entry_count = index.entry_count().await?;

    Ok(StatusReport {
        on_disk: on_disk.len(),
        indexed: on_disk.intersection(&stored).cloned().collect(),
        missing: on_disk.difference(&stored).cloned().collect(),
        orphaned: stored.difference(&on_disk).cloned().collect(),
        unreadable,
        entry_count,
    })
}

/// Run the status command: compare corpus and index and print a summary.
pub async fn run_status(config: &Config) -> Result<()> {
    let scanner = Scanner::from_config(&config.corpus)?;
    let index = SqliteIndex::open(config).await?;
    let report = collect_status(&scanner, &index).await?;
    index.close().await;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("corpus status");
    println!("  root: {}", config.corpus.root.display());
    println!("  database: {} ({})", config.db.path.display(), format_bytes(db_size));
    println!("  on disk: {}", report.on_disk);
    println!("  indexed: {}", report.indexed.len());
    println!("  missing: {}", report.missing.len());
    for id in &report.missing {
        println!("    {}", id);
    }
    println!("  orphaned: {}", report.orphaned.len());
    for id in &report.orphaned {
        println!("    {}", id);
    }
    if report.unreadable > 0 {
        println!("  unreadable: {}", report.unreadable);
    }
    println!("  entries: {}", report.entry_count);
    println!("ok");
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corpus_harness_core::models::{chunk_id_for, Chunk, EntryMetadata, IndexEntry};
    use corpus_harness_core::store::memory::InMemoryIndex;
    use std::fs;
    use tempfile::TempDir;

    fn entry(doc: &str) -> IndexEntry {
        IndexEntry {
            chunk: Chunk {
                id: chunk_id_for(doc, 0),
                document_id: doc.to_string(),
                chunk_index: 0,
                text: "text".to_string(),
                hash: "h".to_string(),
            },
            embedding: vec![1.0, 0.0],
            metadata: EntryMetadata::default(),
        }
    }

    #[tokio::test]
    async fn test_indexed_missing_and_orphaned() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("rome.txt"), "Rome").unwrap();
        fs::write(dir.path().join("egypt.txt"), "Egypt").unwrap();
        let cfg = Config::for_corpus(dir.path().join("db.sqlite"), dir.path());
        let scanner = Scanner::from_config(&cfg.corpus).unwrap();

        let index = InMemoryIndex::new();
        index.upsert(&entry("local_rome")).await.unwrap();
        index.upsert(&entry("local_persia")).await.unwrap();

        let report = collect_status(&scanner, &index).await.unwrap();
        assert_eq!(report.on_disk, 2);
        assert_eq!(report.indexed, vec!["local_rome"]);
        assert_eq!(report.missing, vec!["local_egypt"]);
        assert_eq!(report.orphaned, vec!["local_persia"]);
        assert_eq!(report.unreadable, 0);
        assert_eq!(report.entry_count, 2);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
