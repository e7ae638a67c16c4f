//! Upload termination (DELETE).

use crate::error::{ProtocolError, ProtocolResult};
use crate::handlers::{build_response, hook_request, lock_upload, request_env};
use crate::metrics;
use crate::state::AppState;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::response::Response;
use freight_core::hooks::{HookEvent, HookRequest};
use freight_core::FileInfo;
use freight_storage::Upload;

/// DELETE {base}/{id} - Terminate an upload permanently.
#[tracing::instrument(skip(state, req), fields(upload_id = %id))]
pub async fn del_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    req: Request,
) -> ProtocolResult<Response> {
    let composer = state.composer_for(req.headers());
    let (ctx, _) = request_env(&req)?;

    if !composer.uses_terminater() {
        return Err(ProtocolError::NotImplemented);
    }

    let request = hook_request(&req);
    let _guard = lock_upload(&state, &composer, &ctx, &id).await?;

    let upload = composer.core().get_upload(&id).await?;

    // The descriptor is only needed for the termination event.
    let info = if state.config.server.notify.terminated_uploads {
        upload.info().await?
    } else {
        FileInfo::default()
    };

    terminate_upload(&state, &*upload, &info, &request).await?;

    Ok(build_response(StatusCode::NO_CONTENT, &[], None))
}

/// Terminate `upload` via the store's termination capability and emit the
/// terminated event. Shared between the DELETE handler and the transfer
/// engine's stop-upload teardown.
pub(crate) async fn terminate_upload(
    state: &AppState,
    upload: &dyn Upload,
    info: &FileInfo,
    request: &HookRequest,
) -> ProtocolResult<()> {
    let terminatable = upload
        .as_terminatable()
        .ok_or(ProtocolError::NotImplemented)?;
    terminatable.terminate().await?;

    state
        .notifier
        .terminated(HookEvent {
            upload: info.clone(),
            request: request.clone(),
        })
        .await;

    tracing::info!("upload terminated");
    metrics::UPLOADS_TERMINATED.inc();

    Ok(())
}
