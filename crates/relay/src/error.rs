//! Error types for the relay engine

use manifold_cache::CacheError;
use manifold_protocol::CodecError;
use thiserror::Error;

/// Errors that can occur in the relay core
#[derive(Error, Debug)]
pub enum RelayError {
    /// Cache admission or storage failure
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Malformed frame on the wire
    #[error("protocol error: {0}")]
    Protocol(#[from] CodecError),

    /// Message ingest is halted after repeated storage failures
    #[error("message ingest halted after repeated storage failures")]
    IngestHalted,

    /// Underlying transport failure; fatal to the session only
    #[error("transport error: {0}")]
    Transport(String),

    /// Filesystem failure (cursor file)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;
