//! # Corpus Harness Core
//!
//! Shared logic for Corpus Harness: data models, chunking, the error
//! taxonomy, the [`store::CorpusIndex`] abstraction with an in-memory
//! backend, the [`embedding::Embedder`] trait, query-time retrieval, and
//! answer composition with a canned fallback.
//!
//! This crate contains no tokio, sqlx, or filesystem I/O. Scanning,
//! persistence, embedding backends, and the ingestion synchronizer live in
//! the `corpus-harness` app crate.

pub mod answer;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod models;
pub mod retrieve;
pub mod store;
