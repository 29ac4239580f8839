//! Error types for reviewcrawl.
//!
//! Library crates use [`ReviewCrawlError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Only [`ReviewCrawlError::ProtocolUnavailable`] (and setup failures such as
//! config or storage errors) abort a run. Fetch failures are contained at the
//! forum, validation failures at the record.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level error type for all reviewcrawl operations.
#[derive(Debug, thiserror::Error)]
pub enum ReviewCrawlError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Low-level HTTP/client error outside the dispatcher retry loop.
    #[error("network error: {0}")]
    Network(String),

    /// Response payload could not be decoded.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Neither API generation could serve the venue. Fatal for the run.
    #[error("no API generation available for {venue}: {reason}")]
    ProtocolUnavailable { venue: String, reason: String },

    /// Throttling or transient network failure that survived every retry.
    #[error("transient fetch failure for {url} after {attempts} attempts: {message}")]
    TransientFetchFailure {
        url: String,
        attempts: u32,
        message: String,
    },

    /// Non-retriable response (auth failure, not found, bad request).
    #[error("permanent fetch failure for {url} (status {status:?}): {message}")]
    PermanentFetchFailure {
        url: String,
        status: Option<u16>,
        message: String,
    },

    /// A forum could not be fetched completely; the run continues.
    #[error("forum {forum} failed: {reason}")]
    ForumFetchFailed { forum: String, reason: String },

    /// A note failed canonical validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Downloaded attachment did not match its declared checksum.
    #[error("attachment mismatch for forum {forum}: expected {expected}, got {actual}")]
    AttachmentMismatch {
        forum: String,
        expected: String,
        actual: String,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ReviewCrawlError>;

impl ReviewCrawlError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a forum-scoped failure.
    pub fn forum_failed(forum: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ForumFetchFailed {
            forum: forum.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error came out of an exhausted retry loop.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientFetchFailure { .. })
    }
}

/// Record-scoped validation failure, routed to the reject channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    /// Offending field (e.g. `rating`, `title`, `authors`, `kind`).
    pub field: String,
    /// Human-readable explanation.
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// A required field is absent or empty.
    pub fn missing(field: impl Into<String>) -> Self {
        Self::new(field, "required field is missing or empty")
    }
}
