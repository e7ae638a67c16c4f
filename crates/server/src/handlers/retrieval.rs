//! Upload content download (GET). Not part of the tus protocol, but enabled
//! unless configured away.

use crate::error::ProtocolResult;
use crate::handlers::{build_response, lock_upload, request_env};
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::Response;
use freight_core::headers::filter_content_type;
use futures::StreamExt;

/// GET {base}/{id} - Stream the upload's current content.
#[tracing::instrument(skip(state, req), fields(upload_id = %id))]
pub async fn get_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    req: Request,
) -> ProtocolResult<Response> {
    let composer = state.composer_for(req.headers());
    let (ctx, _) = request_env(&req)?;

    let guard = lock_upload(&state, &composer, &ctx, &id).await?;

    let upload = composer.core().get_upload(&id).await?;
    let info = upload.info().await?;

    // Only a closed set of media types may render inline; everything else
    // is forced into a download.
    let (content_type, content_disposition) = filter_content_type(&info);

    if info.offset == 0 {
        return Ok(build_response(
            StatusCode::NO_CONTENT,
            &[
                ("content-type", content_type),
                ("content-disposition", content_disposition),
            ],
            None,
        ));
    }

    let stream = upload.reader().await?;

    // The lock guard rides inside the stream so concurrent mutation stays
    // blocked until the download finishes. Streaming inside the response
    // also means a mid-copy store failure aborts the connection instead of
    // silently truncating.
    let stream = stream.map(move |item| {
        let _held = &guard;
        item
    });

    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&info.offset.to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }
    if let Ok(value) = HeaderValue::from_str(&content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&content_disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    Ok(response)
}
