//! Upload extension (PATCH).

use crate::error::{ProtocolError, ProtocolResult};
use crate::handlers::{
    build_response, content_length, header_str, hook_request, lock_upload, request_env,
};
use crate::middleware::ProtocolVariant;
use crate::state::AppState;
use crate::transfer;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::response::Response;
use freight_core::OFFSET_OCTET_STREAM;

/// PATCH {base}/{id} - Append a chunk at the current offset.
#[tracing::instrument(skip(state, req), fields(upload_id = %id))]
pub async fn patch_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    req: Request,
) -> ProtocolResult<Response> {
    let composer = state.composer_for(req.headers());
    let (ctx, variant) = request_env(&req)?;

    // tus v1 requires the chunk marker content type; the draft does not.
    if variant == ProtocolVariant::V1
        && header_str(req.headers(), "content-type") != OFFSET_OCTET_STREAM
    {
        return Err(ProtocolError::InvalidContentType);
    }

    let offset: u64 = header_str(req.headers(), "upload-offset")
        .parse()
        .map_err(|_| ProtocolError::InvalidOffset)?;

    let is_complete = header_str(req.headers(), "upload-complete") == "?1";
    let request = hook_request(&req);
    let (parts, body) = req.into_parts();
    let headers = parts.headers;

    let _guard = lock_upload(&state, &composer, &ctx, &id).await?;

    let upload = composer.core().get_upload(&id).await?;
    let mut info = upload.info().await?;

    if info.is_final() {
        return Err(ProtocolError::ModifyFinal);
    }

    if offset != info.offset {
        return Err(ProtocolError::MismatchOffset);
    }

    // An already-complete upload takes no more bytes; report the offset
    // without touching the store.
    if info.is_complete() {
        return Ok(build_response(
            StatusCode::NO_CONTENT,
            &[("upload-offset", offset.to_string())],
            None,
        ));
    }

    // An in-request length declaration is only valid while the length is
    // still deferred.
    let length_header = header_str(&headers, "upload-length");
    if !length_header.is_empty() {
        if !composer.uses_length_deferrer() {
            return Err(ProtocolError::NotImplemented);
        }
        if !info.size_is_deferred() {
            return Err(ProtocolError::InvalidUploadLength);
        }

        let declared: u64 = length_header
            .parse()
            .map_err(|_| ProtocolError::InvalidUploadLength)?;
        if declared < info.offset
            || (state.config.server.max_size > 0 && declared > state.config.server.max_size)
        {
            return Err(ProtocolError::InvalidUploadLength);
        }

        let declarable = upload
            .as_length_declarable()
            .ok_or(ProtocolError::NotImplemented)?;
        declarable.declare_length(declared).await?;
        info.size = Some(declared);
    }

    let outcome = transfer::write_chunk(
        &state,
        &composer,
        &ctx,
        request.clone(),
        body,
        content_length(&headers),
        upload,
        info,
    )
    .await;
    let mut fragment = outcome.fragment;
    outcome.result?;
    let mut info = outcome.info;

    if variant == ProtocolVariant::Draft
        && is_complete
        && info.size_is_deferred()
        && let Some(upload) = &outcome.upload
    {
        // Draft short-circuit: the client declared this request final, so
        // the bytes received so far are the upload's length.
        let fresh = upload.info().await?;
        let declared = fresh.offset;

        let declarable = upload
            .as_length_declarable()
            .ok_or(ProtocolError::NotImplemented)?;
        declarable.declare_length(declared).await?;

        info = fresh;
        info.size = Some(declared);
        transfer::finish_upload_if_complete(&state, &**upload, &mut info, &request, &mut fragment)
            .await?;
    }

    Ok(build_response(StatusCode::NO_CONTENT, &[], Some(fragment)))
}
