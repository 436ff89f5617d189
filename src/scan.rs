//! Document scanner.
//!
//! Walks the corpus root (sorted by file name, so the order is
//! deterministic), filters paths through include/exclude glob sets, and
//! turns each remaining file into a [`Document`]. Problems with a single
//! file become a [`ScanError`] in the stream; the walk itself never aborts.
//!
//! Scanning is lazy and restartable: every call to [`Scanner::scan`] or
//! [`Scanner::entries`] starts a fresh walk, and nothing is read from a file
//! until its item is pulled.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::WalkDir;

use corpus_harness_core::error::ScanError;
use corpus_harness_core::models::{document_id_for, title_from_stem, Document};

use crate::config::CorpusConfig;
use crate::extract;

/// Directories never descended into, whatever the configured globs say.
const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

/// Metadata for a file the scanner will read, gathered without opening it.
#[derive(Debug, Clone)]
pub struct ScanEntry {
    pub id: String,
    pub title: String,
    pub path: PathBuf,
    /// Path relative to the corpus root, `/`-separated.
    pub relative_path: String,
    pub content_type: &'static str,
    pub size_bytes: u64,
    pub modified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct Scanner {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    follow_symlinks: bool,
    min_text_chars: usize,
    max_file_bytes: u64,
}

impl Scanner {
    pub fn from_config(config: &CorpusConfig) -> Result<Self> {
        let root = &config.root;
        if !root.is_dir() {
            bail!("Corpus root does not exist: {}", root.display());
        }

        let include = build_globset(&config.include_globs)?;

        let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|g| g.to_string()).collect();
        excludes.extend(config.exclude_globs.iter().cloned());
        let exclude = build_globset(&excludes)?;

        Ok(Self {
            root: root.clone(),
            include,
            exclude,
            follow_symlinks: config.follow_symlinks,
            min_text_chars: config.min_text_chars,
            max_file_bytes: config.max_file_bytes,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazily walk the corpus and yield file metadata without reading contents.
    ///
    /// A file whose identifier collides with an earlier one in walk order is
    /// reported as an error.
    pub fn entries(&self) -> Entries {
        let walker = WalkDir::new(&self.root)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name()
            .into_iter();
        Entries {
            scanner: self.clone(),
            walker,
            seen: HashMap::new(),
        }
    }

    /// Lazily walk the corpus and yield extracted documents.
    pub fn scan(&self) -> Scan {
        Scan {
            entries: self.entries(),
        }
    }

    /// Read and extract a single entry.
    pub fn read_document(&self, entry: &ScanEntry) -> Result<Document, ScanError> {
        let fail = |reason: String| ScanError::new(&entry.path, Some(entry.id.clone()), reason);

        if entry.size_bytes > self.max_file_bytes {
            return Err(fail(format!(
                "file is {} bytes, larger than the {} byte limit",
                entry.size_bytes, self.max_file_bytes
            )));
        }

        let bytes = std::fs::read(&entry.path).map_err(|e| fail(format!("unreadable: {}", e)))?;
        let text = extract::extract_text(&bytes, entry.content_type).map_err(|e| fail(e.to_string()))?;
        let text = text.trim().to_string();

        let chars = text.chars().count();
        if chars < self.min_text_chars {
            return Err(fail(format!(
                "no substantial text content ({} chars, minimum {})",
                chars, self.min_text_chars
            )));
        }

        let content_hash = format!("{:x}", Sha256::digest(text.as_bytes()));

        Ok(Document {
            id: entry.id.clone(),
            title: entry.title.clone(),
            text,
            source_path: entry.relative_path.clone(),
            content_type: entry.content_type.to_string(),
            size_bytes: entry.size_bytes,
            modified_at: entry.modified_at,
            content_hash,
        })
    }

    fn entry_for(&self, dirent: &walkdir::DirEntry) -> Option<Result<ScanEntry, ScanError>> {
        let path = dirent.path();
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if self.exclude.is_match(&rel_str) || !self.include.is_match(&rel_str) {
            return None;
        }

        let Some(content_type) = extract::content_type_for(path) else {
            debug!(path = %rel_str, "skipping file with unsupported extension");
            return None;
        };

        let id = document_id_for(&rel_str);
        let metadata = match dirent.metadata() {
            Ok(m) => m,
            Err(e) => return Some(Err(ScanError::new(path, Some(id), e.to_string()))),
        };
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        Some(Ok(ScanEntry {
            id,
            title: title_from_stem(&stem),
            path: path.to_path_buf(),
            relative_path: rel_str,
            content_type,
            size_bytes: metadata.len(),
            modified_at: metadata.modified().ok().map(DateTime::<Utc>::from),
        }))
    }
}

/// Iterator returned by [`Scanner::entries`].
pub struct Entries {
    scanner: Scanner,
    walker: walkdir::IntoIter,
    /// Identifier → path that first claimed it.
    seen: HashMap<String, PathBuf>,
}

impl Iterator for Entries {
    type Item = Result<ScanEntry, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let dirent = match self.walker.next()? {
                Ok(d) => d,
                Err(e) => {
                    let path = e
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| self.scanner.root.clone());
                    return Some(Err(ScanError::new(path, None, e.to_string())));
                }
            };
            if !dirent.file_type().is_file() {
                continue;
            }

            let entry = match self.scanner.entry_for(&dirent) {
                None => continue,
                Some(Err(e)) => return Some(Err(e)),
                Some(Ok(entry)) => entry,
            };

            if let Some(first) = self.seen.get(&entry.id) {
                // Keyed by path: the id belongs to the first file.
                return Some(Err(ScanError::new(
                    &entry.path,
                    None,
                    format!("identifier already used by {}", first.display()),
                )));
            }
            self.seen.insert(entry.id.clone(), entry.path.clone());
            return Some(Ok(entry));
        }
    }
}

/// Iterator returned by [`Scanner::scan`].
pub struct Scan {
    entries: Entries,
}

impl Iterator for Scan {
    type Item = Result<Document, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.entries.next()?;
        Some(entry.and_then(|e| self.entries.scanner.read_document(&e)))
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
