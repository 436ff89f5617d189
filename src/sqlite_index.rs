//! SQLite-backed [`CorpusIndex`].
//!
//! Each chunk is one row of the `chunks` table holding its text, metadata,
//! and embedding BLOB. Similarity search loads the vectors and ranks them
//! with brute-force cosine in Rust.

use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use corpus_harness_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use corpus_harness_core::error::IndexError;
use corpus_harness_core::models::{Chunk, EntryMetadata, IndexEntry, ScoredChunk};
use corpus_harness_core::store::{rank, same_content, CorpusIndex, UpsertOutcome};

use crate::config::Config;
use crate::db;
use crate::migrate;

const SELECT_ENTRY: &str = "SELECT id, document_id, chunk_index, text, hash, title, source_path, \
     total_chunks, model, embedding FROM chunks";

/// SQLite implementation of the [`CorpusIndex`] trait.
pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database and ensure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn row_to_entry(row: &SqliteRow) -> Result<IndexEntry, sqlx::Error> {
    let blob: Vec<u8> = row.try_get("embedding")?;
    Ok(IndexEntry {
        chunk: Chunk {
            id: row.try_get("id")?,
            document_id: row.try_get("document_id")?,
            chunk_index: row.try_get("chunk_index")?,
            text: row.try_get("text")?,
            hash: row.try_get("hash")?,
        },
        embedding: blob_to_vec(&blob),
        metadata: EntryMetadata {
            title: row.try_get("title")?,
            source_path: row.try_get("source_path")?,
            total_chunks: row.try_get("total_chunks")?,
            model: row.try_get("model")?,
        },
    })
}

async fn upsert_on(conn: &mut SqliteConnection, entry: &IndexEntry) -> Result<UpsertOutcome, IndexError> {
    let existing = sqlx::query(&format!("{} WHERE id = ?", SELECT_ENTRY))
        .bind(entry.id())
        .fetch_optional(&mut *conn)
        .await
        .map_err(IndexError::write)?;

    let outcome = match existing {
        Some(row) => {
            let stored = row_to_entry(&row).map_err(IndexError::write)?;
            if same_content(&stored, entry) {
                return Ok(UpsertOutcome::Unchanged);
            }
            UpsertOutcome::Updated
        }
        None => UpsertOutcome::Inserted,
    };

    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO chunks (id, document_id, chunk_index, text, hash, title, source_path,
                            total_chunks, model, dims, embedding, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            document_id = excluded.document_id,
            chunk_index = excluded.chunk_index,
            text = excluded.text,
            hash = excluded.hash,
            title = excluded.title,
            source_path = excluded.source_path,
            total_chunks = excluded.total_chunks,
            model = excluded.model,
            dims = excluded.dims,
            embedding = excluded.embedding,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&entry.chunk.id)
    .bind(&entry.chunk.document_id)
    .bind(entry.chunk.chunk_index)
    .bind(&entry.chunk.text)
    .bind(&entry.chunk.hash)
    .bind(&entry.metadata.title)
    .bind(&entry.metadata.source_path)
    .bind(entry.metadata.total_chunks)
    .bind(&entry.metadata.model)
    .bind(entry.embedding.len() as i64)
    .bind(vec_to_blob(&entry.embedding))
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(IndexError::write)?;

    Ok(outcome)
}

#[async_trait]
impl CorpusIndex for SqliteIndex {
    async fn existing_document_ids(&self) -> Result<BTreeSet<String>, IndexError> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT DISTINCT document_id FROM chunks")
            .fetch_all(&self.pool)
            .await
            .map_err(IndexError::read)?;
        Ok(ids.into_iter().collect())
    }

    async fn upsert(&self, entry: &IndexEntry) -> Result<UpsertOutcome, IndexError> {
        let mut conn = self.pool.acquire().await.map_err(IndexError::write)?;
        upsert_on(&mut conn, entry).await
    }

    async fn upsert_many(&self, entries: &[IndexEntry]) -> Result<Vec<UpsertOutcome>, IndexError> {
        // Take the write lock up front: a deferred transaction that has read
        // cannot upgrade once another connection commits (SQLITE_BUSY_SNAPSHOT).
        let mut tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(IndexError::write)?;
        let mut outcomes = Vec::with_capacity(entries.len());
        for entry in entries {
            outcomes.push(upsert_on(&mut tx, entry).await?);
        }
        tx.commit().await.map_err(IndexError::write)?;
        Ok(outcomes)
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(SELECT_ENTRY)
            .fetch_all(&self.pool)
            .await
            .map_err(IndexError::read)?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let entry = row_to_entry(row).map_err(IndexError::read)?;
            let score = cosine_similarity(query, &entry.embedding);
            hits.push(ScoredChunk {
                chunk: entry.chunk,
                metadata: entry.metadata,
                score,
            });
        }
        Ok(rank(hits, k))
    }

    async fn remove_by_document_id(&self, document_id: &str) -> Result<u64, IndexError> {
        let result = sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(IndexError::write)?;
        Ok(result.rows_affected())
    }

    async fn entry_count(&self) -> Result<u64, IndexError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await
            .map_err(IndexError::read)?;
        Ok(count as u64)
    }
}
