//! Route configuration.

use crate::handlers;
use crate::metrics::{self, metrics_handler};
use crate::middleware::protocol_middleware;
use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::{get, head, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    metrics::register_metrics();

    let config = &state.config.server;

    // POST on a per-upload URL only exists for X-HTTP-Method-Override
    // clients; OPTIONS must match a route for the discovery handler to run.
    let mut per_upload = head(handlers::status::head_file)
        .patch(handlers::patch::patch_file)
        .post(handlers::post_override)
        .options(handlers::options_info);
    if !config.disable_download {
        // GET is not part of the tus protocol and can be turned off.
        per_upload = per_upload.get(handlers::retrieval::get_file);
    }
    if state.composer.uses_terminater() && !config.disable_termination {
        per_upload = per_upload.delete(handlers::termination::del_file);
    }

    let files = Router::new()
        .route(
            "/",
            post(handlers::creation::post_file).options(handlers::options_info),
        )
        .route("/{id}", per_upload);

    // The base path is either mounted as a prefix or, for "/", merged in
    // directly. An absolute base path URL still serves from its path
    // component.
    let base = base_route_path(&config.base_path);
    let mut router = if base.is_empty() {
        Router::new().merge(files)
    } else {
        Router::new().nest(&base, files)
    };

    // SECURITY: when enabled, the metrics endpoint must be network-
    // restricted to authorized scrapers.
    if config.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            protocol_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The path component the upload routes mount under, without the trailing
/// slash. Empty for a root base path.
fn base_route_path(base_path: &str) -> String {
    let path = match base_path.find("://") {
        // Absolute base URL: keep only the path component.
        Some(idx) => {
            let rest = &base_path[idx + 3..];
            match rest.find('/') {
                Some(slash) => &rest[slash..],
                None => "/",
            }
        }
        None => base_path,
    };

    path.trim_end_matches('/').to_string()
}
