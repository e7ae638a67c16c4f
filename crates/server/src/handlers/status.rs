//! Upload state queries (HEAD).

use crate::error::ProtocolResult;
use crate::handlers::{build_response, lock_upload, request_env};
use crate::middleware::ProtocolVariant;
use crate::state::AppState;
use crate::url::abs_file_url;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::response::Response;
use freight_core::headers::serialize_metadata;
use freight_core::{DRAFT_INTEROP_VERSION, UPLOAD_LENGTH_DEFERRED};

/// HEAD {base}/{id} - Report the current offset and upload state.
#[tracing::instrument(skip(state, req), fields(upload_id = %id))]
pub async fn head_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    req: Request,
) -> ProtocolResult<Response> {
    let composer = state.composer_for(req.headers());
    let (ctx, variant) = request_env(&req)?;

    // The lock gives the reported offset read-consistency with concurrent
    // PATCHes.
    let _guard = lock_upload(&state, &composer, &ctx, &id).await?;

    let upload = composer.core().get_upload(&id).await?;
    let info = upload.info().await?;

    let mut headers: Vec<(&str, String)> = vec![
        ("cache-control", "no-store".to_string()),
        ("upload-offset", info.offset.to_string()),
    ];

    let status = match variant {
        ProtocolVariant::V1 => {
            if info.is_partial() {
                headers.push(("upload-concat", "partial".to_string()));
            }
            if info.is_final() {
                let urls: Vec<String> = info
                    .partial_uploads()
                    .iter()
                    .map(|part| abs_file_url(&state.config.server, req.headers(), part))
                    .collect();
                headers.push(("upload-concat", format!("final;{}", urls.join(" "))));
            }

            if !info.metadata.is_empty() {
                headers.push(("upload-metadata", serialize_metadata(&info.metadata)));
            }

            match info.size {
                None => {
                    headers.push(("upload-defer-length", UPLOAD_LENGTH_DEFERRED.to_string()));
                }
                Some(size) => {
                    headers.push(("upload-length", size.to_string()));
                    headers.push(("content-length", size.to_string()));
                }
            }

            StatusCode::OK
        }
        ProtocolVariant::Draft => {
            let complete = if info.is_complete() { "?1" } else { "?0" };
            headers.push(("upload-complete", complete.to_string()));
            headers.push((
                "upload-draft-interop-version",
                DRAFT_INTEROP_VERSION.to_string(),
            ));

            StatusCode::NO_CONTENT
        }
    };

    Ok(build_response(status, &headers, None))
}
