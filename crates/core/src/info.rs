//! Upload descriptors and lifecycle state.

use crate::hooks::ResponseFragment;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Upload metadata as carried by the `Upload-Metadata` header: short ASCII
/// keys mapped to arbitrary UTF-8 values.
pub type MetaData = HashMap<String, String>;

/// Concatenation role of an upload.
///
/// A single upload is either partial, final, or neither; the enum makes the
/// mutual exclusion structural instead of relying on two booleans.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ConcatKind {
    /// Intended to be concatenated into a final upload later.
    Partial,
    /// Content is the ordered concatenation of the referenced partials.
    Final {
        /// IDs of the partial uploads, in concatenation order.
        parts: Vec<String>,
    },
}

/// Callback slot used by hooks to stop an in-flight upload.
///
/// Invoking the handle cancels the request that is currently streaming the
/// upload body. The optional fragment is merged into the error response sent
/// to that client.
#[derive(Clone)]
pub struct StopHandle(Arc<dyn Fn(Option<ResponseFragment>) + Send + Sync>);

impl StopHandle {
    pub fn new(f: impl Fn(Option<ResponseFragment>) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Request that the running upload be stopped.
    pub fn stop(&self, response: Option<ResponseFragment>) {
        (self.0)(response)
    }
}

impl fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StopHandle")
    }
}

/// The persisted, authoritative descriptor of an upload.
///
/// Owned by the data store; handlers hold it only for the duration of one
/// request.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileInfo {
    /// Opaque ID assigned by the store (or the pre-create hook) at creation.
    pub id: String,
    /// Declared final byte length. `None` while the length is deferred.
    pub size: Option<u64>,
    /// Total bytes durably accepted so far. Never decreases.
    pub offset: u64,
    /// Client-supplied metadata.
    #[serde(default)]
    pub metadata: MetaData,
    /// Concatenation role, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concat: Option<ConcatKind>,
    /// Opaque backend placement details, set at creation.
    #[serde(default)]
    pub storage: HashMap<String, String>,
    /// Stop callback installed by the transfer engine while a body is being
    /// streamed. Never persisted.
    #[serde(skip)]
    pub stop_upload: Option<StopHandle>,
}

impl FileInfo {
    /// Whether the final length has not been declared yet.
    pub fn size_is_deferred(&self) -> bool {
        self.size.is_none()
    }

    /// Whether all declared bytes have been received.
    pub fn is_complete(&self) -> bool {
        matches!(self.size, Some(size) if size == self.offset)
    }

    pub fn is_partial(&self) -> bool {
        matches!(self.concat, Some(ConcatKind::Partial))
    }

    pub fn is_final(&self) -> bool {
        matches!(self.concat, Some(ConcatKind::Final { .. }))
    }

    /// IDs of the referenced partial uploads (final uploads only).
    pub fn partial_uploads(&self) -> &[String] {
        match &self.concat {
            Some(ConcatKind::Final { parts }) => parts,
            _ => &[],
        }
    }

    /// Install the stop callback. Called by the transfer engine before the
    /// hook event is emitted.
    pub fn set_stop_upload(&mut self, handle: StopHandle) {
        self.stop_upload = Some(handle);
    }
}
