//! The chunk transfer engine.
//!
//! One [`write_chunk`] invocation streams the request body into the store at
//! the current offset until the body ends, the write budget is exhausted,
//! the request is cancelled, or the store fails. The store call runs on its
//! own task so that a dropped request future cannot abandon a half-written
//! chunk before the store has committed what it read.

use crate::body::BodyReader;
use crate::context::{CancelCause, RequestContext};
use crate::error::{ProtocolError, ProtocolResult};
use crate::handlers::termination::terminate_upload;
use crate::metrics;
use crate::state::AppState;
use axum::body::Body;
use freight_core::hooks::{HookEvent, HookRequest};
use freight_core::{FileInfo, ResponseFragment, StopHandle};
use freight_storage::{StoreComposer, Upload};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What a chunk transfer produced. `result` carries the reportable error;
/// `info.offset` is the durable offset either way.
pub(crate) struct ChunkOutcome {
    /// The upload handle, returned for post-transfer steps. `None` only if
    /// the transfer task itself died.
    pub upload: Option<Box<dyn Upload>>,
    pub info: FileInfo,
    /// Response headers (always `Upload-Offset`) plus anything merged by
    /// the pre-finish hook.
    pub fragment: ResponseFragment,
    pub result: ProtocolResult<()>,
}

/// Stream the request body into `upload` starting at `info.offset`.
pub(crate) async fn write_chunk(
    state: &AppState,
    composer: &StoreComposer,
    ctx: &RequestContext,
    request: HookRequest,
    body: Body,
    content_length: Option<u64>,
    upload: Box<dyn Upload>,
    mut info: FileInfo,
) -> ChunkOutcome {
    let offset = info.offset;
    let config = &state.config.server;

    // Eager bound: a declared Content-Length that cannot fit is rejected
    // before any store write.
    if let Some(size) = info.size
        && let Some(length) = content_length
        && offset + length > size
    {
        return ChunkOutcome {
            upload: Some(upload),
            info,
            fragment: ResponseFragment::default(),
            result: Err(ProtocolError::SizeExceeded),
        };
    }

    // The write budget: remaining declared size, or the remaining global
    // maximum for deferred uploads, or unbounded. A known Content-Length is
    // the tightest bound of the three.
    let mut max_size = match info.size {
        Some(size) => size - offset,
        None if config.max_size > 0 => config.max_size.saturating_sub(offset),
        None => u64::MAX,
    };
    if let Some(length) = content_length
        && length > 0
    {
        max_size = length;
    }

    tracing::info!(max_size, offset, "chunk write start");

    let mut reader = BodyReader::new(body, max_size, ctx.clone(), config.network_timeout());
    let progress = reader.progress_counter();

    // Let hooks stop this upload: the handle cancels the request context,
    // which the body reader observes as its terminal condition.
    let stop_ctx = ctx.clone();
    info.set_stop_upload(StopHandle::new(move |fragment| {
        stop_ctx.set_stop_response(fragment);
        stop_ctx.cancel_with(CancelCause::Stopped);
    }));

    let emitter_stop = ctx.cancel_token().child_token();
    if config.notify.upload_progress {
        spawn_progress_emitter(
            state.clone(),
            HookEvent {
                upload: info.clone(),
                request: request.clone(),
            },
            progress,
            config.upload_progress_interval(),
            emitter_stop.clone(),
        );
    }

    // The store sees a clean EOF from the reader on every terminal
    // condition and reports the bytes it durably committed.
    let write_task = tokio::spawn(async move {
        let result = upload.write_chunk(offset, &mut reader).await;
        (upload, reader, result)
    });

    let (upload, mut reader, write_result) = match write_task.await {
        Ok(parts) => parts,
        Err(join_err) => {
            emitter_stop.cancel();
            return ChunkOutcome {
                upload: None,
                info,
                fragment: ResponseFragment::default(),
                result: Err(ProtocolError::Internal(format!(
                    "chunk write task failed: {join_err}"
                ))),
            };
        }
    };
    emitter_stop.cancel();

    let (bytes_written, store_err) = match write_result {
        Ok(written) => (written, None),
        Err(err) => (err.bytes_written, Some(ProtocolError::Store(err.source))),
    };

    let body_err = reader.take_error();
    let body_stopped = matches!(&body_err, Some(ProtocolError::UploadStopped { .. }));
    if let Some(err) = &body_err {
        tracing::error!(error = %err, "body read error");
    }

    // The store's error wins; the body error is reported only when the
    // store did not also fail.
    let err = store_err.or(body_err);

    // A stopped upload is torn down best-effort; the client only learns
    // about the stop itself.
    if body_stopped && composer.uses_terminater() {
        if let Err(term_err) = terminate_upload(state, &*upload, &info, &request).await {
            tracing::error!(error = %term_err, "failed to terminate stopped upload");
        }
    }

    let new_offset = offset + bytes_written;
    metrics::BYTES_RECEIVED.inc_by(bytes_written);
    info.offset = new_offset;
    tracing::info!(bytes_written, new_offset, "chunk write complete");

    let mut fragment = ResponseFragment::default();
    fragment
        .headers
        .insert("Upload-Offset".to_string(), new_offset.to_string());

    // Completion is attempted even after a failed transfer; the transfer
    // error still takes precedence in the response.
    let finish_result =
        finish_upload_if_complete(state, &*upload, &mut info, &request, &mut fragment).await;
    let result = match err {
        Some(err) => Err(err),
        None => finish_result,
    };

    ChunkOutcome {
        upload: Some(upload),
        info,
        fragment,
        result,
    }
}

/// If the upload's offset has reached its declared size, let the store seal
/// it, run the pre-finish hook, and emit the completion event.
pub(crate) async fn finish_upload_if_complete(
    state: &AppState,
    upload: &dyn Upload,
    info: &mut FileInfo,
    request: &HookRequest,
    fragment: &mut ResponseFragment,
) -> ProtocolResult<()> {
    if !info.is_complete() {
        return Ok(());
    }

    upload.finish().await?;

    if let Some(hook) = &state.hooks.pre_finish {
        let merged = hook(HookEvent {
            upload: info.clone(),
            request: request.clone(),
        })
        .await
        .map_err(|rejection| ProtocolError::UploadRejected {
            response: rejection.response,
        })?;
        fragment.merge(merged);
    }

    tracing::info!(size = info.size, "upload finished");
    metrics::UPLOADS_FINISHED.inc();
    state
        .notifier
        .complete(HookEvent {
            upload: info.clone(),
            request: request.clone(),
        })
        .await;

    Ok(())
}

/// Periodically publish the current offset while a transfer runs. A final
/// emission happens when the task is stopped.
fn spawn_progress_emitter(
    state: AppState,
    event: HookEvent,
    progress: Arc<AtomicU64>,
    interval: Duration,
    stop: CancellationToken,
) {
    tokio::spawn(async move {
        let original_offset = event.upload.offset;
        let mut previous = 0u64;

        fn next_event(
            base: &HookEvent,
            original_offset: u64,
            previous: &mut u64,
            read: u64,
        ) -> Option<HookEvent> {
            let offset = original_offset + read;
            if offset == *previous {
                return None;
            }
            *previous = offset;
            let mut event = base.clone();
            event.upload.offset = offset;
            Some(event)
        }

        loop {
            let stopping = tokio::select! {
                _ = stop.cancelled() => true,
                _ = tokio::time::sleep(interval) => false,
            };

            let read = progress.load(Ordering::Relaxed);
            if let Some(update) = next_event(&event, original_offset, &mut previous, read) {
                state.notifier.progress(update).await;
            }

            if stopping {
                return;
            }
        }
    });
}
