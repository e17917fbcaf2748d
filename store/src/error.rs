use thiserror::Error;

use crate::Revision;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("key not found: {key}")]
    NotFound { key: String },

    #[error("revision mismatch for {key}: expected {expected}, but store is at {actual}")]
    RevisionMismatch {
        key: String,
        expected: Revision,
        actual: Revision,
    },

    #[error("unknown URL scheme {scheme:?} in {url}")]
    UnknownScheme { scheme: String, url: String },

    #[error("invalid store URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid store option {name}={value:?}")]
    InvalidOption { name: String, value: String },

    #[error("revision {requested} has been compacted (oldest available is {})", .compacted + 1)]
    Compacted {
        requested: Revision,
        compacted: Revision,
    },

    #[error("watch on {prefix} fell behind: {capacity} events buffered without being consumed")]
    WatchOverflow { prefix: String, capacity: usize },

    #[error("store is closed")]
    Closed,

    #[error("operation cancelled")]
    Cancelled,

    #[error("{operation} {key} failed: {source}")]
    Backend {
        operation: &'static str,
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl StoreError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    pub fn backend<E>(operation: &'static str, key: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            operation,
            key: key.into(),
            source: Box::new(source),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_revision_mismatch(&self) -> bool {
        matches!(self, Self::RevisionMismatch { .. })
    }

    /// Cancellation is caller-initiated and should not be logged as a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
