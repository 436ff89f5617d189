//! Document removal by id.
//!
//! Deletes every chunk of one document so the next `corpus ingest` treats it
//! as new. Used by `corpus remove`.

use anyhow::Result;

use corpus_harness_core::store::CorpusIndex;

use crate::config::Config;
use crate::sqlite_index::SqliteIndex;

pub async fn run_remove(config: &Config, document_id: &str) -> Result<()> {
    let index = SqliteIndex::open(config).await?;
    let removed = index.remove_by_document_id(document_id).await;
    index.close().await;
    let removed = removed?;

    if removed == 0 {
        println!("remove {}: not indexed", document_id);
    } else {
        println!("remove {}", document_id);
        println!("  entries removed: {}", removed);
    }
    println!("ok");
    Ok(())
}
