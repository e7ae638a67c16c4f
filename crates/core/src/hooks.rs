//! Hook events and callback types.
//!
//! Hooks are externally supplied callbacks invoked at well-defined lifecycle
//! points: before an upload is created, and before the response completing
//! an upload is sent. They may reject the operation, override parts of the
//! upload descriptor, or merge headers into the response.

use crate::info::{FileInfo, MetaData};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// A snapshot of the request handed to hook callbacks.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HookRequest {
    pub method: String,
    pub uri: String,
    pub remote_addr: String,
    /// Selected request headers, single-valued.
    pub headers: HashMap<String, String>,
}

/// Event payload passed to hook callbacks and notification channels.
#[derive(Clone, Debug, Default)]
pub struct HookEvent {
    pub upload: FileInfo,
    pub request: HookRequest,
}

/// A partial HTTP response a hook may contribute. Fragments are merged onto
/// the response the handler was going to send anyway.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ResponseFragment {
    /// Replacement status code, if any.
    pub status: Option<u16>,
    /// Headers to set, overriding same-named headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Replacement body, if any.
    pub body: Option<String>,
}

impl ResponseFragment {
    /// Merge `other` into `self`; values from `other` win.
    pub fn merge(&mut self, other: ResponseFragment) {
        if other.status.is_some() {
            self.status = other.status;
        }
        self.headers.extend(other.headers);
        if other.body.is_some() {
            self.body = other.body;
        }
    }
}

/// Descriptor overrides a pre-create hook may apply.
#[derive(Clone, Debug, Default)]
pub struct InfoChanges {
    pub id: Option<String>,
    pub metadata: Option<MetaData>,
    pub storage: Option<HashMap<String, String>>,
}

/// Error returned by a hook to reject the operation.
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct HookRejection {
    pub reason: String,
    /// Optional response fragment shown to the rejected client.
    pub response: Option<ResponseFragment>,
}

/// Callback invoked before an upload resource is created.
pub type PreCreateHook = Arc<
    dyn Fn(HookEvent) -> BoxFuture<'static, Result<(ResponseFragment, InfoChanges), HookRejection>>
        + Send
        + Sync,
>;

/// Callback invoked after an upload completed, before the final response.
pub type PreFinishHook =
    Arc<dyn Fn(HookEvent) -> BoxFuture<'static, Result<ResponseFragment, HookRejection>> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_merge_other_wins() {
        let mut base = ResponseFragment {
            status: Some(201),
            headers: HashMap::from([("X-A".to_string(), "1".to_string())]),
            body: None,
        };
        base.merge(ResponseFragment {
            status: None,
            headers: HashMap::from([
                ("X-A".to_string(), "2".to_string()),
                ("X-B".to_string(), "3".to_string()),
            ]),
            body: Some("hello".to_string()),
        });

        assert_eq!(base.status, Some(201));
        assert_eq!(base.headers["X-A"], "2");
        assert_eq!(base.headers["X-B"], "3");
        assert_eq!(base.body.as_deref(), Some("hello"));
    }
}
