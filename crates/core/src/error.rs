//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid Upload-Concat header: {0}")]
    InvalidConcat(String),

    #[error("invalid upload path: {0}")]
    InvalidUploadPath(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
