//! Storage error types.

use thiserror::Error;

/// Storage backend error type.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("upload not found: {0}")]
    NotFound(String),

    #[error("upload offset mismatch: expected {expected}, got {actual}")]
    OffsetMismatch { expected: u64, actual: u64 },

    #[error("invalid upload id: {0}")]
    InvalidId(String),

    #[error("upload descriptor corrupted: {0}")]
    CorruptDescriptor(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
