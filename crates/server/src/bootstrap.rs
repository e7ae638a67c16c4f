//! Construction of the application state from configuration.

use crate::notify::NotificationStreams;
use crate::state::{AppState, Hooks, StoreSelector};
use anyhow::{Context, Result};
use freight_core::config::{AppConfig, StorageConfig};
use freight_storage::{FilesystemStore, MemoryLocker};
use std::sync::Arc;

/// Build the configured store, compose its capabilities, and assemble the
/// shared application state.
pub async fn build_state(
    config: AppConfig,
    hooks: Hooks,
    selector: Option<Arc<dyn StoreSelector>>,
) -> Result<(AppState, NotificationStreams)> {
    let composer = match &config.storage {
        StorageConfig::Filesystem { path } => {
            let store = FilesystemStore::new(path)
                .await
                .with_context(|| format!("failed to open storage root {}", path.display()))?;
            store.compose(MemoryLocker::new())
        }
    };

    Ok(AppState::new(config, composer, hooks, selector))
}
