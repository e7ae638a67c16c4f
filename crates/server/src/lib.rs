//! HTTP protocol engine for resumable uploads.
//!
//! This crate provides the request-facing half of freight:
//! - Protocol handlers for tus 1.0.0 and the IETF resumable upload draft
//! - The chunk transfer engine with bounded, cancellable body streaming
//! - Per-upload locking, lifecycle hooks, and notification fan-out
//! - CORS, version negotiation, and protocol discovery middleware

pub mod body;
pub mod bootstrap;
pub mod context;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod notify;
pub mod routes;
pub mod state;
mod transfer;
pub mod url;

pub use context::{CancelCause, RequestContext};
pub use error::{ProtocolError, ProtocolResult};
pub use middleware::ProtocolVariant;
pub use notify::{NotificationStreams, Notifier};
pub use routes::create_router;
pub use state::{AppState, Hooks, StoreSelector};
