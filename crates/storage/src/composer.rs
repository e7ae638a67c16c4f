//! Capability registry for a data store.

use crate::lock::Locker;
use crate::traits::DataStore;
use std::sync::Arc;

/// A [`DataStore`] together with the optional capabilities it provides.
///
/// The flags gate both the advertised `Tus-Extension` header and the request
/// paths that need the corresponding capability; a disabled capability makes
/// those paths fail with `ERR_NOT_IMPLEMENTED`. Backends install themselves
/// via [`StoreComposer::new`] plus the `enable_*` calls for what they
/// actually implement.
#[derive(Clone)]
pub struct StoreComposer {
    core: Arc<dyn DataStore>,
    locker: Option<Arc<dyn Locker>>,
    uses_terminater: bool,
    uses_concater: bool,
    uses_length_deferrer: bool,
}

impl StoreComposer {
    /// Compose around a core store with no optional capabilities.
    pub fn new(core: Arc<dyn DataStore>) -> Self {
        Self {
            core,
            locker: None,
            uses_terminater: false,
            uses_concater: false,
            uses_length_deferrer: false,
        }
    }

    pub fn enable_termination(mut self) -> Self {
        self.uses_terminater = true;
        self
    }

    pub fn enable_concatenation(mut self) -> Self {
        self.uses_concater = true;
        self
    }

    pub fn enable_length_deferral(mut self) -> Self {
        self.uses_length_deferrer = true;
        self
    }

    pub fn with_locker(mut self, locker: Arc<dyn Locker>) -> Self {
        self.locker = Some(locker);
        self
    }

    pub fn core(&self) -> &Arc<dyn DataStore> {
        &self.core
    }

    pub fn locker(&self) -> Option<&Arc<dyn Locker>> {
        self.locker.as_ref()
    }

    pub fn uses_terminater(&self) -> bool {
        self.uses_terminater
    }

    pub fn uses_concater(&self) -> bool {
        self.uses_concater
    }

    pub fn uses_length_deferrer(&self) -> bool {
        self.uses_length_deferrer
    }

    pub fn uses_locker(&self) -> bool {
        self.locker.is_some()
    }

    /// Render the `Tus-Extension` header value for the installed
    /// capabilities. Only implemented extensions are promoted.
    pub fn supported_extensions(&self) -> String {
        let mut extensions = String::from("creation,creation-with-upload");
        if self.uses_terminater {
            extensions.push_str(",termination");
        }
        if self.uses_concater {
            extensions.push_str(",concatenation");
        }
        if self.uses_length_deferrer {
            extensions.push_str(",creation-defer-length");
        }
        extensions
    }
}
