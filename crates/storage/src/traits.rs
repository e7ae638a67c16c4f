//! Storage trait definitions.

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use bytes::Bytes;
use freight_core::FileInfo;
use futures::Stream;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncRead;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StoreResult<Bytes>> + Send>>;

/// The request-body source handed to [`Upload::write_chunk`]. The reader is
/// bounded by the caller and presents a clean EOF on terminal conditions, so
/// backends can consume it with plain `AsyncRead` loops.
pub type BodySource = dyn AsyncRead + Send + Unpin;

/// Error from a chunk write, carrying the number of bytes that were durably
/// committed before the failure. The handler advances the upload offset by
/// this count even when the write fails.
#[derive(Debug, Error)]
#[error("chunk write failed after {bytes_written} bytes: {source}")]
pub struct ChunkWriteError {
    pub bytes_written: u64,
    #[source]
    pub source: StoreError,
}

/// Core data store operations. Required from every backend.
#[async_trait]
pub trait DataStore: Send + Sync + 'static {
    /// Create a new upload from the given descriptor. An empty `info.id`
    /// asks the store to assign one; a non-empty ID (e.g. from a pre-create
    /// hook) must be used as-is.
    async fn create_upload(&self, info: FileInfo) -> StoreResult<Box<dyn Upload>>;

    /// Fetch an existing upload by ID.
    async fn get_upload(&self, id: &str) -> StoreResult<Box<dyn Upload>>;
}

impl std::fmt::Debug for dyn Upload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upload").finish_non_exhaustive()
    }
}

/// A handle to one upload, valid for the duration of one request.
#[async_trait]
pub trait Upload: Send + Sync {
    /// Read the authoritative descriptor.
    async fn info(&self) -> StoreResult<FileInfo>;

    /// Append bytes from `src` at `offset` until EOF. Returns the number of
    /// bytes durably written; on failure the error still reports the bytes
    /// committed before it.
    async fn write_chunk(&self, offset: u64, src: &mut BodySource) -> Result<u64, ChunkWriteError>;

    /// Finalize a completed upload.
    async fn finish(&self) -> StoreResult<()>;

    /// Open the upload's content for reading.
    async fn reader(&self) -> StoreResult<ByteStream>;

    /// Termination capability handle, if the backend supports it.
    fn as_terminatable(&self) -> Option<&dyn TerminatableUpload> {
        None
    }

    /// Concatenation capability handle, if the backend supports it.
    fn as_concatable(&self) -> Option<&dyn ConcatableUpload> {
        None
    }

    /// Length-declaration capability handle, if the backend supports it.
    fn as_length_declarable(&self) -> Option<&dyn LengthDeclarableUpload> {
        None
    }
}

/// Capability: remove an upload and all its resources.
#[async_trait]
pub trait TerminatableUpload: Send + Sync {
    async fn terminate(&self) -> StoreResult<()>;
}

/// Capability: materialize a final upload from completed partial uploads.
#[async_trait]
pub trait ConcatableUpload: Send + Sync {
    /// Concatenate the given partial uploads, in order, into this upload.
    async fn concat_uploads(&self, partials: &[Box<dyn Upload>]) -> StoreResult<()>;
}

/// Capability: declare the final length of a deferred-length upload.
#[async_trait]
pub trait LengthDeclarableUpload: Send + Sync {
    async fn declare_length(&self, length: u64) -> StoreResult<()>;
}

impl ChunkWriteError {
    pub fn new(bytes_written: u64, source: StoreError) -> Self {
        Self {
            bytes_written,
            source,
        }
    }
}

impl From<ChunkWriteError> for StoreError {
    fn from(err: ChunkWriteError) -> Self {
        err.source
    }
}
