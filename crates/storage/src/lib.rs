//! Storage abstraction for the freight upload server.
//!
//! The server core talks to a [`StoreComposer`], which bundles a required
//! [`DataStore`] with the optional capabilities a backend may provide:
//! termination, concatenation, length deferral, and locking.

pub mod backends;
pub mod composer;
pub mod error;
pub mod lock;
pub mod traits;

pub use backends::filesystem::FilesystemStore;
pub use composer::StoreComposer;
pub use error::{StoreError, StoreResult};
pub use lock::{Locker, MemoryLocker, RequestRelease, UploadLock};
pub use traits::{
    ByteStream, ChunkWriteError, ConcatableUpload, DataStore, LengthDeclarableUpload,
    TerminatableUpload, Upload,
};
