//! Ingestion synchronizer.
//!
//! Reconciles the scanned corpus against the index:
//!
//! 1. Snapshot the document ids already in the index, once, before any
//!    embedding work starts.
//! 2. Walk the corpus on a blocking thread feeding a bounded channel. A file
//!    whose id is in the snapshot is skipped without being read; the rest
//!    are read and extracted there.
//! 3. Chunk, embed, and write the new documents on a bounded pool of
//!    concurrent tasks.
//! 4. Report processed, skipped, and failed documents.
//!
//! A document is skipped by identifier alone. Changed text under an id that
//! is already indexed is not re-embedded until the document is removed.
//!
//! A failing document never aborts the run: embedding errors are retried
//! with backoff when retryable, and a document whose write fails after
//! retries has its partial entries removed so the next run picks it up
//! again. Only an unreadable index aborts a run, before any work is done.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use corpus_harness_core::chunk::chunk_text;
use corpus_harness_core::embedding::Embedder;
use corpus_harness_core::error::{EmbeddingError, IndexError, ScanError};
use corpus_harness_core::models::{Chunk, Document, EntryMetadata, IndexEntry};
use corpus_harness_core::store::CorpusIndex;

use crate::config::{ChunkingConfig, Config};
use crate::embedding::create_embedder;
use crate::progress::{DocumentOutcome, IngestProgressEvent, IngestProgressReporter, ProgressMode};
use crate::retry::RetryPolicy;
use crate::scan::Scanner;
use crate::sqlite_index::SqliteIndex;

#[derive(Debug, Error)]
pub enum IngestError {
    /// The existing-id snapshot could not be taken; nothing was ingested.
    #[error("cannot read indexed document ids: {0}")]
    IndexRead(IndexError),
}

/// A document that could not be ingested, keyed by its id (or its path when
/// no id could be derived).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDocument {
    pub id: String,
    pub reason: String,
}

/// Outcome of one ingestion run. Id lists are sorted.
#[derive(Debug, Clone, Default)]
pub struct IngestionSummary {
    pub run_id: String,
    pub processed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<FailedDocument>,
    /// Entries written, or that would be written in a dry run.
    pub chunks: u64,
    pub dry_run: bool,
    /// The run was cancelled before every document was seen.
    pub cancelled: bool,
}

/// What the scanning thread sends for each corpus entry.
enum Scanned {
    /// In the snapshot; the file was not read.
    Indexed(String),
    /// Seen earlier in this run.
    Duplicate(String),
    Read(Result<Document, ScanError>),
}

enum Handled {
    Processed { chunks: u64 },
    Skipped,
    Failed(String),
}

pub struct Ingestor {
    index: Arc<dyn CorpusIndex>,
    embedder: Arc<dyn Embedder>,
    scanner: Scanner,
    chunking: ChunkingConfig,
    concurrency: usize,
    batch_size: usize,
    embed_timeout: Duration,
    index_timeout: Duration,
    retry: RetryPolicy,
    run_lock: Mutex<()>,
}

impl Ingestor {
    pub fn new(
        config: &Config,
        index: Arc<dyn CorpusIndex>,
        embedder: Arc<dyn Embedder>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            index,
            embedder,
            scanner: Scanner::from_config(&config.corpus)?,
            chunking: config.chunking.clone(),
            concurrency: config.ingest.concurrency.max(1),
            batch_size: config.embedding.batch_size.max(1),
            embed_timeout: config.embedding.timeout(),
            index_timeout: config.ingest.index_timeout(),
            retry: RetryPolicy::from_config(&config.ingest),
            run_lock: Mutex::new(()),
        })
    }

    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    /// Run one ingestion pass. Concurrent calls on the same `Ingestor` wait
    /// for the running pass to finish.
    ///
    /// With `dry_run`, documents are scanned and diffed against the index
    /// but nothing is embedded or written.
    pub async fn run(
        &self,
        dry_run: bool,
        cancel: &CancellationToken,
        progress: &dyn IngestProgressReporter,
    ) -> Result<IngestionSummary, IngestError> {
        let _guard = self.run_lock.lock().await;
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("ingest", run_id = %run_id, dry_run);
        self.run_locked(run_id, dry_run, cancel, progress)
            .instrument(span)
            .await
    }

    async fn run_locked(
        &self,
        run_id: String,
        dry_run: bool,
        cancel: &CancellationToken,
        progress: &dyn IngestProgressReporter,
    ) -> Result<IngestionSummary, IngestError> {
        let existing = self
            .with_index_timeout(self.index.existing_document_ids())
            .await
            .map_err(IngestError::IndexRead)?;
        info!(
            root = %self.scanner.root().display(),
            indexed = existing.len(),
            "ingestion started"
        );
        progress.report(IngestProgressEvent::Scanning {
            root: self.scanner.root().display().to_string(),
        });

        let (tx, mut rx) = mpsc::channel::<Scanned>(self.concurrency * 2);
        let scanner = self.scanner.clone();
        let scan_cancel = cancel.clone();
        let producer = tokio::task::spawn_blocking(move || {
            // Ids handed out during this run. The snapshot itself is never
            // modified.
            let mut claimed: HashSet<String> = HashSet::new();
            for entry in scanner.entries() {
                if scan_cancel.is_cancelled() {
                    break;
                }
                let item = match entry {
                    Err(e) => Scanned::Read(Err(e)),
                    Ok(entry) if existing.contains(&entry.id) => Scanned::Indexed(entry.id),
                    Ok(entry) if !claimed.insert(entry.id.clone()) => Scanned::Duplicate(entry.id),
                    Ok(entry) => Scanned::Read(scanner.read_document(&entry)),
                };
                if tx.blocking_send(item).is_err() {
                    break;
                }
            }
        });

        let mut results = Box::pin(
            futures::stream::poll_fn(move |cx| rx.poll_recv(cx))
                .take_until(cancel.cancelled())
                .map(|item| self.handle(item, dry_run, cancel))
                .buffer_unordered(self.concurrency),
        );

        let mut summary = IngestionSummary {
            run_id,
            dry_run,
            ..IngestionSummary::default()
        };
        let mut n = 0u64;
        while let Some((id, handled)) = results.next().await {
            n += 1;
            let outcome = match handled {
                Handled::Processed { chunks } => {
                    summary.chunks += chunks;
                    summary.processed.push(id.clone());
                    DocumentOutcome::Processed
                }
                Handled::Skipped => {
                    summary.skipped.push(id.clone());
                    DocumentOutcome::Skipped
                }
                Handled::Failed(reason) => {
                    summary.failed.push(FailedDocument {
                        id: id.clone(),
                        reason,
                    });
                    DocumentOutcome::Failed
                }
            };
            progress.report(IngestProgressEvent::Document { n, id, outcome });
        }
        // Dropping the receiver unblocks a producer waiting on a full channel.
        drop(results);

        if let Err(e) = producer.await {
            warn!(error = %e, "scanner task did not finish cleanly");
        }

        summary.cancelled = cancel.is_cancelled();
        summary.processed.sort();
        summary.skipped.sort();
        summary.failed.sort_by(|a, b| a.id.cmp(&b.id));

        progress.report(IngestProgressEvent::Finished {
            processed: summary.processed.len() as u64,
            skipped: summary.skipped.len() as u64,
            failed: summary.failed.len() as u64,
        });
        info!(
            processed = summary.processed.len(),
            skipped = summary.skipped.len(),
            failed = summary.failed.len(),
            chunks = summary.chunks,
            cancelled = summary.cancelled,
            "ingestion finished"
        );
        Ok(summary)
    }

    async fn handle(
        &self,
        item: Scanned,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> (String, Handled) {
        let doc = match item {
            Scanned::Indexed(id) => {
                debug!(id = %id, "already indexed");
                return (id, Handled::Skipped);
            }
            Scanned::Duplicate(id) => {
                debug!(id = %id, "already handled in this run");
                return (id, Handled::Skipped);
            }
            Scanned::Read(Ok(doc)) => doc,
            Scanned::Read(Err(e)) => {
                warn!(path = %e.path.display(), reason = %e.reason, "skipping unreadable document");
                return (e.key(), Handled::Failed(e.reason));
            }
        };

        let chunks = chunk_text(
            &doc.id,
            &doc.text,
            self.chunking.max_tokens,
            self.chunking.overlap_tokens,
        );
        if dry_run {
            return (doc.id, Handled::Processed { chunks: chunks.len() as u64 });
        }

        match self.ingest_document(&doc, chunks, cancel).await {
            Ok(written) => {
                info!(id = %doc.id, chunks = written, "document ingested");
                (doc.id, Handled::Processed { chunks: written })
            }
            Err(reason) => {
                warn!(id = %doc.id, reason = %reason, "document failed");
                (doc.id, Handled::Failed(reason))
            }
        }
    }

    /// Embed every chunk, then write all entries. Nothing is written unless
    /// every chunk was embedded.
    async fn ingest_document(
        &self,
        doc: &Document,
        chunks: Vec<Chunk>,
        cancel: &CancellationToken,
    ) -> Result<u64, String> {
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embedded = self
                .retry
                .run(cancel, EmbeddingError::is_retryable, || self.embed_batch(&texts))
                .await
                .map_err(|e| e.to_string())?;
            if embedded.len() != texts.len() {
                return Err(format!(
                    "embedder returned {} vectors for {} chunks",
                    embedded.len(),
                    texts.len()
                ));
            }
            vectors.extend(embedded);
        }

        let total_chunks = chunks.len() as i64;
        let metadata = EntryMetadata {
            title: Some(doc.title.clone()),
            source_path: Some(doc.source_path.clone()),
            total_chunks,
            model: self.embedder.model_name().to_string(),
        };
        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| IndexEntry {
                chunk,
                embedding,
                metadata: metadata.clone(),
            })
            .collect();

        let written = self
            .retry
            .run(cancel, IndexError::is_retryable, || {
                self.with_index_timeout(self.index.upsert_many(&entries))
            })
            .await;

        match written {
            Ok(_) => Ok(entries.len() as u64),
            Err(e) => {
                match self
                    .with_index_timeout(self.index.remove_by_document_id(&doc.id))
                    .await
                {
                    Ok(removed) if removed > 0 => {
                        debug!(id = %doc.id, removed, "removed partial entries")
                    }
                    Ok(_) => {}
                    Err(cleanup) => {
                        warn!(id = %doc.id, error = %cleanup, "could not remove partial entries")
                    }
                }
                Err(e.to_string())
            }
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        match tokio::time::timeout(self.embed_timeout, self.embedder.embed(texts)).await {
            Ok(result) => result,
            Err(_) => Err(EmbeddingError::Timeout(self.embed_timeout)),
        }
    }

    async fn with_index_timeout<T>(
        &self,
        op: impl Future<Output = Result<T, IndexError>>,
    ) -> Result<T, IndexError> {
        match tokio::time::timeout(self.index_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(IndexError::Timeout(self.index_timeout)),
        }
    }
}

/// Run the ingest command against the configured SQLite index and print
/// a summary on stdout.
pub async fn run_ingest(
    config: &Config,
    dry_run: bool,
    progress: ProgressMode,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    if !dry_run && !config.embedding.is_enabled() {
        anyhow::bail!(
            "Embedding provider is disabled. Set [embedding] provider in config to ingest documents."
        );
    }

    let index = Arc::new(SqliteIndex::open(config).await?);
    let embedder = create_embedder(&config.embedding)?;
    let ingestor = Ingestor::new(config, index.clone(), embedder)?;

    let reporter = progress.reporter();
    let result = ingestor.run(dry_run, &cancel, reporter.as_ref()).await;
    index.close().await;
    let summary = result?;

    if dry_run {
        println!("ingest {} (dry-run)", config.corpus.root.display());
        println!("  would process: {}", summary.processed.len());
        println!("  already indexed: {}", summary.skipped.len());
        println!("  estimated chunks: {}", summary.chunks);
    } else {
        println!("ingest {}", config.corpus.root.display());
        println!("  processed: {}", summary.processed.len());
        println!("  skipped: {}", summary.skipped.len());
        println!("  chunks written: {}", summary.chunks);
    }
    println!("  failed: {}", summary.failed.len());
    for failed in &summary.failed {
        println!("    {}: {}", failed.id, failed.reason);
    }
    if summary.cancelled {
        println!("  cancelled: resume with `corpus ingest`");
    }
    println!("ok");
    Ok(())
}
