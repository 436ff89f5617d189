//! Error taxonomy shared by the scanner, the synchronizer, and retrieval.
//!
//! | Error | Recoverable at | Handling |
//! |-------|----------------|----------|
//! | [`ScanError`] | file | skip the file, keep scanning |
//! | [`EmbeddingError`] | document | retry when [`EmbeddingError::is_retryable`], else fail the document |
//! | [`IndexError::Write`] | document | retry, then fail the document |
//! | [`IndexError::Read`] | run | abort the ingestion run |
//! | [`RetrieveError`] | call | returned to the caller |
//! | [`ComposeError`] | call | replaced by a canned answer |

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// A single file the scanner could not turn into a document.
#[derive(Debug, Clone, Error)]
#[error("{}: {reason}", path.display())]
pub struct ScanError {
    pub path: PathBuf,
    /// Identifier the file would have had, when one could be derived.
    pub document_id: Option<String>,
    pub reason: String,
}

impl ScanError {
    pub fn new(path: impl Into<PathBuf>, document_id: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            document_id,
            reason: reason.into(),
        }
    }

    /// Key used when reporting this error in an ingestion summary.
    pub fn key(&self) -> String {
        self.document_id
            .clone()
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

#[derive(Debug, Clone, Error)]
pub enum EmbeddingError {
    #[error("embedding provider rate limited: {0}")]
    RateLimited(String),

    #[error("transient embedding failure: {0}")]
    Transient(String),

    #[error("embedding rejected: {0}")]
    Permanent(String),

    #[error("embedding call timed out after {0:?}")]
    Timeout(Duration),

    #[error("embedding provider is disabled")]
    Disabled,
}

impl EmbeddingError {
    /// Rate limits and transient failures are retried with backoff.
    /// Timeouts are not: a timed-out call fails its document.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Transient(_))
    }
}

#[derive(Debug, Clone, Error)]
pub enum IndexError {
    #[error("index read failed: {0}")]
    Read(String),

    #[error("index write failed: {0}")]
    Write(String),

    #[error("index call timed out after {0:?}")]
    Timeout(Duration),
}

impl IndexError {
    pub fn read(err: impl std::fmt::Display) -> Self {
        Self::Read(err.to_string())
    }

    pub fn write(err: impl std::fmt::Display) -> Self {
        Self::Write(err.to_string())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Write(_))
    }
}

#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Failure of the external answer-composition capability.
#[derive(Debug, Clone, Error)]
pub enum ComposeError {
    #[error("answer composer is disabled")]
    Disabled,

    #[error("answer composition failed: {0}")]
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_error_key_prefers_document_id() {
        let with_id = ScanError::new("books/a.txt", Some("local_a".into()), "unreadable");
        assert_eq!(with_id.key(), "local_a");

        let without_id = ScanError::new("books/a.txt", None, "unreadable");
        assert_eq!(without_id.key(), "books/a.txt");
    }

    #[test]
    fn retryable_classification() {
        assert!(EmbeddingError::RateLimited("429".into()).is_retryable());
        assert!(EmbeddingError::Transient("503".into()).is_retryable());
        assert!(!EmbeddingError::Permanent("400".into()).is_retryable());
        assert!(!EmbeddingError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!EmbeddingError::Disabled.is_retryable());

        assert!(IndexError::Write("locked".into()).is_retryable());
        assert!(!IndexError::Read("corrupt".into()).is_retryable());
        assert!(!IndexError::Timeout(Duration::from_secs(1)).is_retryable());
    }
}
