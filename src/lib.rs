//! # Corpus Harness
//!
//! Idempotent ingestion of a local book corpus into a vector index, and
//! retrieval over it for retrieval-augmented generation.
//!
//! Ingestion is snapshot-then-delta: the ids already in the index are read
//! once per run, and only books missing from that snapshot are chunked,
//! embedded, and written. Re-running ingestion over an unchanged corpus does
//! no embedding work.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────┐
//! │  Scanner    │──▶│   Ingestor    │──▶│  SQLite    │
//! │ txt/md/pdf/ │   │ diff + chunk  │   │  chunks +  │
//! │ docx/epub   │   │ + embed       │   │  vectors   │
//! └─────────────┘   └──────────────┘   └─────┬─────┘
//!                                            │
//!                                            ▼
//!                                     ┌────────────┐
//!                                     │ Retriever  │──▶ Answer composer
//!                                     └────────────┘
//! ```
//!
//! The storage-agnostic pieces (models, chunker, `CorpusIndex` and
//! `Embedder` traits, retriever, answer orchestration) live in
//! `corpus-harness-core`; this crate adds the filesystem, SQLite, HTTP
//! embedding providers, and the `corpus` CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`scan`] | Corpus walk and document extraction |
//! | [`extract`] | Text extraction for PDF, DOCX, EPUB |
//! | [`embedding`] | Embedding provider backends |
//! | [`sqlite_index`] | Persistent `CorpusIndex` |
//! | [`ingest`] | Ingestion synchronizer |
//! | [`retry`] | Backoff for retryable failures |
//! | [`progress`] | Ingestion progress on stderr |
//! | [`status`] | Corpus vs. index comparison |
//! | [`search`] | Query commands |
//! | [`remove`] | Removal of one document from the index |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod ingest;
pub mod migrate;
pub mod progress;
pub mod remove;
pub mod retry;
pub mod scan;
pub mod search;
pub mod sqlite_index;
pub mod status;
