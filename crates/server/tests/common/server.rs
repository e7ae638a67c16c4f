//! Server test harness.

use freight_core::config::{AppConfig, ServerConfig, StorageConfig};
use freight_server::{AppState, Hooks, NotificationStreams, create_router};
use tempfile::TempDir;

/// A test server with temporary filesystem storage.
/// Note: #[allow(dead_code)] because each test file compiles common/
/// separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub streams: Option<NotificationStreams>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a test server with default configuration.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with modified configuration.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::build(modifier, Hooks::default()).await
    }

    /// Create a test server with hooks installed.
    pub async fn with_hooks(hooks: Hooks) -> Self {
        Self::build(|_| {}, hooks).await
    }

    async fn build<F>(modifier: F, hooks: Hooks) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("failed to create temp directory");

        let mut config = AppConfig {
            server: ServerConfig::default(),
            storage: StorageConfig::Filesystem {
                path: temp_dir.path().join("uploads"),
            },
        };
        modifier(&mut config);

        let (state, streams) = freight_server::bootstrap::build_state(config, hooks, None)
            .await
            .expect("failed to build state");
        let router = create_router(state.clone());

        Self {
            router,
            state,
            streams: Some(streams),
            _temp_dir: temp_dir,
        }
    }
}
