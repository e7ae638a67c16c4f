//! Application state shared across handlers.

use crate::notify::{NotificationStreams, Notifier};
use axum::http::HeaderMap;
use freight_core::config::AppConfig;
use freight_core::hooks::{PreCreateHook, PreFinishHook};
use freight_storage::StoreComposer;
use regex::Regex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Per-request store selection.
///
/// A deployment may route requests to different backends based on request
/// headers (multi-tenant bucket selection, for example). Handlers call the
/// selector once per request and use the returned composer locally, so the
/// shared state is never rebound. Authorizing the selection is the
/// implementer's business.
pub trait StoreSelector: Send + Sync + 'static {
    /// Return a composer for this request, or `None` to use the default.
    fn select(&self, headers: &HeaderMap) -> Option<StoreComposer>;
}

/// Lifecycle hook callbacks, all optional.
#[derive(Clone, Default)]
pub struct Hooks {
    pub pre_create: Option<PreCreateHook>,
    pub pre_finish: Option<PreFinishHook>,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Default store composer.
    pub composer: StoreComposer,
    /// Optional per-request store selector.
    pub selector: Option<Arc<dyn StoreSelector>>,
    /// Lifecycle hooks.
    pub hooks: Hooks,
    /// Notification channels.
    pub notifier: Notifier,
    /// Server-wide shutdown token; cancelling it drains in-flight requests
    /// with `ERR_SERVER_SHUTDOWN`.
    pub shutdown: CancellationToken,
    /// Compiled CORS allow-origin pattern.
    pub allow_origin: Arc<Regex>,
}

impl AppState {
    /// Create the application state and the notification receiver set.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid (bad base path, malformed
    /// allow-origin pattern).
    pub fn new(
        config: AppConfig,
        composer: StoreComposer,
        hooks: Hooks,
        selector: Option<Arc<dyn StoreSelector>>,
    ) -> (Self, NotificationStreams) {
        if let Err(error) = config.server.validate() {
            panic!("invalid server configuration: {error}");
        }

        let allow_origin = match Regex::new(&config.server.cors.allow_origin) {
            Ok(re) => Arc::new(re),
            Err(error) => panic!("invalid cors.allow_origin pattern: {error}"),
        };

        let (notifier, streams) = Notifier::new(config.server.notify);

        (
            Self {
                config: Arc::new(config),
                composer,
                selector,
                hooks,
                notifier,
                shutdown: CancellationToken::new(),
                allow_origin,
            },
            streams,
        )
    }

    /// Resolve the composer serving this request.
    pub fn composer_for(&self, headers: &HeaderMap) -> StoreComposer {
        self.selector
            .as_ref()
            .and_then(|selector| selector.select(headers))
            .unwrap_or_else(|| self.composer.clone())
    }
}
