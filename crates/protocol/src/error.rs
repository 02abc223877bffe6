//! Error types for the protocol crate

use thiserror::Error;

/// Errors that can occur while encoding or decoding frames
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    /// Frame ended before the field could be read
    #[error("truncated frame: {0}")]
    Truncated(&'static str),

    /// Unknown frame kind discriminant
    #[error("unknown frame kind: {0:#04x}")]
    UnknownKind(u8),

    /// Unknown info code
    #[error("unknown info code: {0:#04x}")]
    UnknownInfoCode(u8),

    /// Unknown error code
    #[error("unknown error code: {0:#04x}")]
    UnknownErrorCode(u8),

    /// Declared body length exceeds the wire limit
    #[error("frame body too large: {len} bytes (max {max})")]
    BodyTooLarge { len: u32, max: u32 },

    /// Declared body length does not match the remaining bytes
    #[error("frame body length mismatch: declared {declared}, got {actual}")]
    BodyLengthMismatch { declared: u32, actual: usize },
}

/// Result type for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;
