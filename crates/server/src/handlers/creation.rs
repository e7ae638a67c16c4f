//! Upload creation handlers (POST), for tus v1 and the resumable upload
//! draft.

use crate::context::RequestContext;
use crate::error::{ProtocolError, ProtocolResult};
use crate::handlers::{
    build_response, content_length, header_str, hook_request, lock_upload, request_env,
};
use crate::metrics;
use crate::middleware::ProtocolVariant;
use crate::state::AppState;
use crate::transfer;
use crate::url::abs_file_url;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use freight_core::headers::{ConcatHeader, parse_concat, parse_media_type, parse_metadata};
use freight_core::hooks::HookEvent;
use freight_core::{
    ConcatKind, DRAFT_INTEROP_VERSION, FileInfo, OFFSET_OCTET_STREAM, ResponseFragment,
    UPLOAD_LENGTH_DEFERRED,
};
use freight_storage::{StoreComposer, Upload};

/// POST {base} - Create a new upload.
#[tracing::instrument(skip_all)]
pub async fn post_file(State(state): State<AppState>, req: Request) -> ProtocolResult<Response> {
    let composer = state.composer_for(req.headers());
    let (ctx, variant) = request_env(&req)?;

    if variant == ProtocolVariant::Draft {
        return post_file_draft(state, composer, ctx, req).await;
    }

    let request = hook_request(&req);
    let (parts, body) = req.into_parts();
    let headers = parts.headers;

    // Any other content type is treated as no inline chunk at all, since
    // some HTTP clients force a default value for this header.
    let contains_chunk = header_str(&headers, "content-type") == OFFSET_OCTET_STREAM;

    // Only honor Upload-Concat if the store can actually concatenate.
    let concat_header = if composer.uses_concater() {
        header_str(&headers, "upload-concat")
    } else {
        ""
    };

    let mut partial_uploads = Vec::new();
    let (size, concat) = match parse_concat(concat_header)? {
        ConcatHeader::Final(ids) => {
            // A final upload must not carry a chunk in the creation request.
            if contains_chunk {
                return Err(ProtocolError::ModifyFinal);
            }
            let (uploads, total) = size_of_uploads(&composer, &ids).await?;
            partial_uploads = uploads;
            (Some(total), Some(ConcatKind::Final { parts: ids }))
        }
        ConcatHeader::Partial => (
            validate_new_upload_length_headers(&composer, &headers)?,
            Some(ConcatKind::Partial),
        ),
        ConcatHeader::None => (validate_new_upload_length_headers(&composer, &headers)?, None),
    };

    if state.config.server.max_size > 0
        && let Some(size) = size
        && size > state.config.server.max_size
    {
        return Err(ProtocolError::MaxSizeExceeded);
    }

    let info = FileInfo {
        size,
        metadata: parse_metadata(header_str(&headers, "upload-metadata")),
        concat,
        ..Default::default()
    };

    let (info, mut fragment) = run_pre_create_hook(&state, info, &request).await?;

    let upload = composer.core().create_upload(info).await?;
    let mut info = upload.info().await?;
    let id = info.id.clone();

    let url = abs_file_url(&state.config.server, &headers, &id);
    metrics::UPLOADS_CREATED.inc();
    tracing::info!(id = %id, size = ?info.size, url = %url, "upload created");

    state
        .notifier
        .created(HookEvent {
            upload: info.clone(),
            request: request.clone(),
        })
        .await;

    if info.is_final() {
        let concatable = upload.as_concatable().ok_or(ProtocolError::NotImplemented)?;
        concatable.concat_uploads(&partial_uploads).await?;
        info.offset = size.unwrap_or(0);

        state
            .notifier
            .complete(HookEvent {
                upload: info.clone(),
                request: request.clone(),
            })
            .await;
    }

    if contains_chunk {
        let _guard = lock_upload(&state, &composer, &ctx, &id).await?;

        let outcome = transfer::write_chunk(
            &state,
            &composer,
            &ctx,
            request,
            body,
            content_length(&headers),
            upload,
            info,
        )
        .await;
        fragment.merge(outcome.fragment);
        outcome.result?;
    } else if !info.is_final() && info.size == Some(0) {
        // An empty upload is complete the moment it is created.
        transfer::finish_upload_if_complete(&state, &*upload, &mut info, &request, &mut fragment)
            .await?;
    }

    Ok(build_response(
        StatusCode::CREATED,
        &[("location", url)],
        Some(fragment),
    ))
}

/// POST {base} - Create a new upload following the IETF resumable upload
/// draft. The body always streams; completeness is signalled by
/// `Upload-Complete`.
async fn post_file_draft(
    state: AppState,
    composer: StoreComposer,
    ctx: RequestContext,
    req: Request,
) -> ProtocolResult<Response> {
    let request = hook_request(&req);
    let (parts, body) = req.into_parts();
    let headers = parts.headers;

    let is_complete = header_str(&headers, "upload-complete") == "?1";
    let length = content_length(&headers);

    let mut info = FileInfo::default();
    if is_complete && length.is_some() {
        // Single-request upload with a known Content-Length fixes the size.
        info.size = length;
    } else if !composer.uses_length_deferrer() {
        return Err(ProtocolError::NotImplemented);
    }

    let content_type = header_str(&headers, "content-type");
    if !content_type.is_empty() {
        let (filetype, _) =
            parse_media_type(content_type).ok_or(ProtocolError::InvalidContentType)?;
        info.metadata.insert("filetype".to_string(), filetype);
    }

    let content_disposition = header_str(&headers, "content-disposition");
    if !content_disposition.is_empty()
        && let Some((_, params)) = parse_media_type(content_disposition)
        && let Some(filename) = params.get("filename")
    {
        info.metadata
            .insert("filename".to_string(), filename.clone());
    }

    let (info, mut fragment) = run_pre_create_hook(&state, info, &request).await?;

    let upload = composer.core().create_upload(info).await?;
    let info = upload.info().await?;
    let id = info.id.clone();

    let url = abs_file_url(&state.config.server, &headers, &id);
    metrics::UPLOADS_CREATED.inc();
    tracing::info!(id = %id, size = ?info.size, url = %url, "upload created");

    state
        .notifier
        .created(HookEvent {
            upload: info.clone(),
            request: request.clone(),
        })
        .await;

    let _guard = lock_upload(&state, &composer, &ctx, &id).await?;

    let outcome = transfer::write_chunk(
        &state,
        &composer,
        &ctx,
        request.clone(),
        body,
        length,
        upload,
        info,
    )
    .await;
    fragment.merge(outcome.fragment);
    outcome.result?;
    let mut info = outcome.info;

    if is_complete
        && info.size_is_deferred()
        && let Some(upload) = &outcome.upload
    {
        // The body has ended and the client says that was everything:
        // whatever arrived is the final length.
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

    Ok(build_response(
        StatusCode::CREATED,
        &[
            ("location", url),
            (
                "upload-draft-interop-version",
                DRAFT_INTEROP_VERSION.to_string(),
            ),
        ],
        Some(fragment),
    ))
}

/// Run the pre-create hook, applying descriptor overrides and collecting the
/// response fragment.
async fn run_pre_create_hook(
    state: &AppState,
    mut info: FileInfo,
    request: &freight_core::hooks::HookRequest,
) -> ProtocolResult<(FileInfo, ResponseFragment)> {
    let mut fragment = ResponseFragment::default();

    if let Some(hook) = &state.hooks.pre_create {
        let event = HookEvent {
            upload: info.clone(),
            request: request.clone(),
        };
        let (merged, changes) = hook(event)
            .await
            .map_err(|rejection| ProtocolError::UploadRejected {
                response: rejection.response,
            })?;
        fragment.merge(merged);

        if let Some(id) = changes.id {
            info.id = id;
        }
        if let Some(metadata) = changes.metadata {
            info.metadata = metadata;
        }
        if let Some(storage) = changes.storage {
            info.storage = storage;
        }
    }

    Ok((info, fragment))
}

/// Resolve the partial uploads referenced by a final upload and sum their
/// sizes. Every referenced upload must exist and be complete.
async fn size_of_uploads(
    composer: &StoreComposer,
    ids: &[String],
) -> ProtocolResult<(Vec<Box<dyn Upload>>, u64)> {
    let mut uploads = Vec::with_capacity(ids.len());
    let mut total = 0u64;

    for id in ids {
        let upload = composer.core().get_upload(id).await?;
        let info = upload.info().await?;

        if !info.is_complete() {
            return Err(ProtocolError::UploadNotFinished);
        }

        total += info.size.unwrap_or(0);
        uploads.push(upload);
    }

    Ok((uploads, total))
}

/// Check the `Upload-Length` / `Upload-Defer-Length` pair for a creation
/// request. Exactly one of them must be usable.
fn validate_new_upload_length_headers(
    composer: &StoreComposer,
    headers: &HeaderMap,
) -> ProtocolResult<Option<u64>> {
    let length_header = header_str(headers, "upload-length");
    let defer_header = header_str(headers, "upload-defer-length");
    let length_is_deferred = defer_header == UPLOAD_LENGTH_DEFERRED;

    if length_is_deferred && !composer.uses_length_deferrer() {
        Err(ProtocolError::NotImplemented)
    } else if !length_header.is_empty() && !defer_header.is_empty() {
        Err(ProtocolError::AmbiguousUploadLength)
    } else if !defer_header.is_empty() && !length_is_deferred {
        Err(ProtocolError::InvalidUploadDeferLength)
    } else if length_is_deferred {
        Ok(None)
    } else {
        length_header
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ProtocolError::InvalidUploadLength)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use freight_storage::{FilesystemStore, MemoryLocker};

    async fn test_composer() -> (tempfile::TempDir, StoreComposer) {
        let temp = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(temp.path()).await.unwrap();
        (temp, store.compose(MemoryLocker::new()))
    }

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::try_from(*name).unwrap(),
                axum::http::HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[tokio::test]
    async fn test_length_headers_exactly_one() {
        let (_temp, composer) = test_composer().await;

        let ok = validate_new_upload_length_headers(&composer, &headers(&[("upload-length", "5")]));
        assert_eq!(ok.unwrap(), Some(5));

        let deferred =
            validate_new_upload_length_headers(&composer, &headers(&[("upload-defer-length", "1")]));
        assert_eq!(deferred.unwrap(), None);

        let both = validate_new_upload_length_headers(
            &composer,
            &headers(&[("upload-length", "5"), ("upload-defer-length", "1")]),
        );
        assert!(matches!(both, Err(ProtocolError::AmbiguousUploadLength)));

        let bad_defer =
            validate_new_upload_length_headers(&composer, &headers(&[("upload-defer-length", "2")]));
        assert!(matches!(bad_defer, Err(ProtocolError::InvalidUploadDeferLength)));

        let negative =
            validate_new_upload_length_headers(&composer, &headers(&[("upload-length", "-3")]));
        assert!(matches!(negative, Err(ProtocolError::InvalidUploadLength)));

        let none: &[(&str, &str)] = &[];
        let missing = validate_new_upload_length_headers(&composer, &headers(none));
        assert!(matches!(missing, Err(ProtocolError::InvalidUploadLength)));
    }

    #[tokio::test]
    async fn test_size_of_uploads_requires_complete_partials() {
        let (_temp, composer) = test_composer().await;

        let incomplete = composer
            .core()
            .create_upload(FileInfo {
                size: Some(10),
                ..Default::default()
            })
            .await
            .unwrap();
        let id = incomplete.info().await.unwrap().id;

        let err = size_of_uploads(&composer, &[id]).await.unwrap_err();
        assert!(matches!(err, ProtocolError::UploadNotFinished));

        let missing = size_of_uploads(&composer, &["nope".to_string()]).await;
        assert_eq!(missing.unwrap_err().code(), "ERR_UPLOAD_NOT_FOUND");
    }
}
