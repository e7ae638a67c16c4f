//! Core domain types and shared logic for the freight upload server.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Upload descriptors and concatenation state
//! - Header grammars (Upload-Metadata, Upload-Concat, Forwarded)
//! - Hook event and callback types
//! - Configuration types

pub mod config;
pub mod error;
pub mod headers;
pub mod hooks;
pub mod info;

pub use error::{Error, Result};
pub use hooks::{HookEvent, InfoChanges, ResponseFragment};
pub use info::{ConcatKind, FileInfo, MetaData, StopHandle};

/// Protocol version advertised and required in `Tus-Resumable`.
pub const TUS_RESUMABLE_VERSION: &str = "1.0.0";

/// Literal value of the `Upload-Defer-Length` header.
pub const UPLOAD_LENGTH_DEFERRED: &str = "1";

/// Interop version of the IETF resumable upload draft implemented here.
pub const DRAFT_INTEROP_VERSION: &str = "4";

/// Content type marking a request body as a raw upload chunk.
pub const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";
