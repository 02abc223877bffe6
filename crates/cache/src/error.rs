//! Error types for the cache crate

use thiserror::Error;

/// Errors that can occur in the sequence cache
#[derive(Error, Debug)]
pub enum CacheError {
    /// Sequence already admitted
    #[error("duplicate sequence {seq} (tail is {tail})")]
    DuplicateSeq { seq: u64, tail: u64 },

    /// Sequence is not strictly greater than the current tail
    #[error("non-monotonic sequence {seq} (tail is {tail})")]
    NonMonotonicSeq { seq: u64, tail: u64 },

    /// Backing store failure
    #[error("storage error: {0}")]
    Storage(#[from] heed::Error),

    /// Filesystem failure opening or syncing the store
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CacheError {
    /// True for the rejections a caller may treat as idempotent replay
    #[inline]
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            CacheError::DuplicateSeq { .. } | CacheError::NonMonotonicSeq { .. }
        )
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
