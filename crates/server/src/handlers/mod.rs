//! Protocol request handlers.

pub mod creation;
pub mod patch;
pub mod retrieval;
pub mod status;
pub mod termination;

use crate::context::{CancelCause, RequestContext};
use crate::error::{ProtocolError, ProtocolResult};
use crate::middleware::ProtocolVariant;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use freight_core::{ResponseFragment, TUS_RESUMABLE_VERSION};
use freight_core::hooks::HookRequest;
use freight_storage::{RequestRelease, StoreComposer, UploadLock};
use std::sync::Arc;

/// OPTIONS {base} and OPTIONS {base}/{id} - Protocol discovery.
///
/// Responds 200 rather than 204: some legacy browsers only accept 200 OK as
/// a successful preflight response.
pub async fn options_info(State(state): State<AppState>) -> Response {
    let config = &state.config.server;

    let mut headers: Vec<(&str, String)> = Vec::new();
    if config.max_size > 0 {
        headers.push(("tus-max-size", config.max_size.to_string()));
    }
    headers.push(("tus-version", TUS_RESUMABLE_VERSION.to_string()));
    headers.push(("tus-extension", state.composer.supported_extensions()));

    build_response(StatusCode::OK, &headers, None)
}

/// POST {base}/{id} - Dispatch for clients using `X-HTTP-Method-Override`.
///
/// The middleware has already rewritten the request method; a POST that
/// still reaches this handler carried no usable override.
pub async fn post_override(
    state: State<AppState>,
    path: Path<String>,
    req: Request,
) -> Response {
    let method = req.method().clone();
    if method == Method::PATCH {
        patch::patch_file(state, path, req).await.into_response()
    } else if method == Method::DELETE {
        if state.config.server.disable_termination {
            return StatusCode::METHOD_NOT_ALLOWED.into_response();
        }
        termination::del_file(state, path, req).await.into_response()
    } else if method == Method::HEAD {
        status::head_file(state, path, req).await.into_response()
    } else {
        StatusCode::METHOD_NOT_ALLOWED.into_response()
    }
}

/// Pull the middleware-installed context and protocol variant out of the
/// request.
pub(crate) fn request_env(req: &Request) -> ProtocolResult<(RequestContext, ProtocolVariant)> {
    let ctx = req
        .extensions()
        .get::<RequestContext>()
        .cloned()
        .ok_or_else(|| ProtocolError::Internal("request context not installed".to_string()))?;
    let variant = req
        .extensions()
        .get::<ProtocolVariant>()
        .copied()
        .unwrap_or(ProtocolVariant::V1);
    Ok((ctx, variant))
}

/// Snapshot the request for hook events.
pub(crate) fn hook_request(req: &Request) -> HookRequest {
    let mut headers = std::collections::HashMap::new();
    for (name, value) in req.headers() {
        if let Ok(value) = value.to_str() {
            headers.insert(name.to_string(), value.to_string());
        }
    }
    HookRequest {
        method: req.method().to_string(),
        uri: req.uri().to_string(),
        remote_addr: String::new(),
        headers,
    }
}

/// Parse the Content-Length header, if present and valid.
pub(crate) fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(axum::http::header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("")
}

/// A held per-upload lock. Dropping the guard releases the lock on a
/// background task, so every handler exit path unlocks.
pub(crate) struct LockGuard {
    lock: Option<Box<dyn UploadLock>>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(mut lock) = self.lock.take() {
            tokio::spawn(async move {
                lock.release().await;
            });
        }
    }
}

/// Acquire the per-upload lock if the composer has a locker.
///
/// A peer contending for the same upload triggers `release_requested`, which
/// cancels this request's context with cause `Interrupted`; the wait itself
/// is bounded by `acquire_lock_timeout`, after which the peer receives
/// `ERR_UPLOAD_LOCKED`.
pub(crate) async fn lock_upload(
    state: &AppState,
    composer: &StoreComposer,
    ctx: &RequestContext,
    id: &str,
) -> ProtocolResult<Option<LockGuard>> {
    let Some(locker) = composer.locker() else {
        return Ok(None);
    };

    let mut lock = locker.new_lock(id);
    let release_ctx = ctx.clone();
    let release_requested: RequestRelease = Arc::new(move || {
        tracing::info!("upload interrupted by a concurrent request");
        release_ctx.cancel_with(CancelCause::Interrupted);
    });

    match tokio::time::timeout(
        state.config.server.acquire_lock_timeout(),
        lock.acquire(release_requested),
    )
    .await
    {
        Ok(Ok(())) => Ok(Some(LockGuard { lock: Some(lock) })),
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "lock provider failure");
            Err(ProtocolError::LockTimeout)
        }
        Err(_elapsed) => Err(ProtocolError::FileLocked),
    }
}

/// Build a response from a status, header list, and an optional hook
/// fragment. Fragment values win over handler values.
pub(crate) fn build_response(
    status: StatusCode,
    headers: &[(&str, String)],
    fragment: Option<ResponseFragment>,
) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;

    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(*name),
            HeaderValue::try_from(value.as_str()),
        ) {
            response.headers_mut().insert(name, value);
        }
    }

    if let Some(fragment) = fragment {
        if let Some(code) = fragment.status
            && let Ok(parsed) = StatusCode::from_u16(code)
        {
            *response.status_mut() = parsed;
        }
        for (name, value) in &fragment.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                response.headers_mut().insert(name, value);
            }
        }
        if let Some(body) = fragment.body {
            *response.body_mut() = Body::from(body);
        }
    }

    response
}
