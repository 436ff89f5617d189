//! # Corpus Harness CLI (`corpus`)
//!
//! The `corpus` binary drives ingestion and retrieval over a local book
//! corpus: it creates the index, synchronizes the corpus into it, reports
//! what is (and is not) indexed, and runs queries.
//!
//! ## Usage
//!
//! ```bash
//! corpus --config ./config/corpus.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `corpus init` | Create the SQLite database and schema |
//! | `corpus ingest` | Embed and index every book not yet in the index |
//! | `corpus status` | Compare books on disk with the index |
//! | `corpus search "<query>"` | Ranked passages for a query |
//! | `corpus ask "<question>"` | Retrieve passages and compose an answer |
//! | `corpus remove <id>` | Remove one book from the index |
//!
//! Results go to stdout; logs (`RUST_LOG`, default `info`) and progress go
//! to stderr.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use corpus_harness::progress::ProgressMode;
use corpus_harness::{config, ingest, migrate, remove, search, status};

/// Corpus Harness CLI — idempotent book-corpus ingestion and retrieval.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/corpus.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "corpus",
    about = "Corpus Harness — idempotent book-corpus ingestion and retrieval",
    version,
    long_about = "Corpus Harness scans a directory of books, embeds every book not yet in its \
    index, and answers similarity queries over the stored passages. Re-running ingestion only \
    processes books that are new since the last run."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/corpus.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Ingest every book that is not yet indexed.
    ///
    /// Books already present in the index are skipped by identifier. Books
    /// that fail are reported and retried on the next run. Ctrl-C stops
    /// picking up new books; the run can be resumed later.
    Ingest {
        /// Scan and compare with the index without embedding or writing.
        #[arg(long)]
        dry_run: bool,

        /// Progress on stderr: `human`, `json`, or `off`.
        /// Defaults to `human` when stderr is a terminal, otherwise `off`.
        #[arg(long, value_parser = parse_progress)]
        progress: Option<ProgressMode>,
    },

    /// Show indexed, missing, and orphaned books.
    Status,

    /// Search the index for passages similar to a query.
    Search {
        /// The search query string.
        query: String,

        /// Number of passages to return.
        #[arg(long)]
        k: Option<i64>,
    },

    /// Answer a question from the most relevant passages.
    Ask {
        question: String,

        /// Number of passages to retrieve.
        #[arg(long)]
        k: Option<i64>,
    },

    /// Remove every passage of a book from the index.
    Remove {
        /// Document id, e.g. `local_rome_history`.
        id: String,
    },
}

fn parse_progress(s: &str) -> Result<ProgressMode, String> {
    ProgressMode::parse(s).ok_or_else(|| format!("unknown progress mode '{}' (human, json, off)", s))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { dry_run, progress } => {
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_signal.cancel();
                }
            });
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            ingest::run_ingest(&cfg, dry_run, mode, cancel).await?;
        }
        Commands::Status => {
            status::run_status(&cfg).await?;
        }
        Commands::Search { query, k } => {
            search::run_search(&cfg, &query, k).await?;
        }
        Commands::Ask { question, k } => {
            search::run_ask(&cfg, &question, k).await?;
        }
        Commands::Remove { id } => {
            remove::run_remove(&cfg, &id).await?;
        }
    }

    Ok(())
}
