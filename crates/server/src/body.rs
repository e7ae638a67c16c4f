//! Bounded, observable, cancellable reader over the request body.
//!
//! [`BodyReader`] is what the store consumes during a chunk transfer. It
//! enforces the write budget, refreshes the idle-read deadline after every
//! delivered chunk, and watches the request's cancellation layer. Terminal
//! conditions are *recorded*, not propagated: the store always observes a
//! clean EOF, commits what it has, and the transfer engine retrieves the
//! recorded error afterwards. A store error therefore always outranks a
//! body error.

use crate::context::RequestContext;
use crate::error::ProtocolError;
use axum::body::{Body, BodyDataStream};
use bytes::Bytes;
use futures::Stream;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::time::{Instant, Sleep};
use tokio_util::sync::WaitForCancellationFutureOwned;

/// Streaming reader over a request body.
pub struct BodyReader {
    stream: BodyDataStream,
    buf: Bytes,
    /// Bytes accepted from the transport, including buffered ones.
    received: u64,
    /// Bytes handed to the store, shared with the progress emitter.
    delivered: Arc<AtomicU64>,
    limit: u64,
    error: Option<ProtocolError>,
    eof: bool,
    ctx: RequestContext,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    deadline: Pin<Box<Sleep>>,
    network_timeout: Duration,
}

impl BodyReader {
    /// Wrap `body`, delivering at most `limit` bytes.
    pub fn new(body: Body, limit: u64, ctx: RequestContext, network_timeout: Duration) -> Self {
        let cancelled = Box::pin(ctx.cancel_token().cancelled_owned());
        Self {
            stream: body.into_data_stream(),
            buf: Bytes::new(),
            received: 0,
            delivered: Arc::new(AtomicU64::new(0)),
            limit,
            error: None,
            eof: false,
            ctx,
            cancelled,
            deadline: Box::pin(tokio::time::sleep(network_timeout)),
            network_timeout,
        }
    }

    /// Bytes delivered to the store so far.
    pub fn bytes_read(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Shared counter of delivered bytes, for the progress emitter.
    pub fn progress_counter(&self) -> Arc<AtomicU64> {
        self.delivered.clone()
    }

    /// Take the recorded terminal error, if any.
    pub fn take_error(&mut self) -> Option<ProtocolError> {
        self.error.take()
    }
}

impl AsyncRead for BodyReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        dst: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            // Deliver buffered bytes first, even past a terminal condition:
            // everything buffered was accepted within the budget.
            if !this.buf.is_empty() {
                let n = this.buf.len().min(dst.remaining());
                if n == 0 {
                    return Poll::Ready(Ok(()));
                }
                dst.put_slice(&this.buf.split_to(n));
                this.delivered.fetch_add(n as u64, Ordering::Relaxed);
                this.deadline
                    .as_mut()
                    .reset(Instant::now() + this.network_timeout);
                return Poll::Ready(Ok(()));
            }

            if this.error.is_some() || this.eof {
                return Poll::Ready(Ok(()));
            }

            if this.cancelled.as_mut().poll(cx).is_ready() {
                this.error = Some(this.ctx.cause_error());
                continue;
            }

            if this.deadline.as_mut().poll(cx).is_ready() {
                this.error = Some(ProtocolError::ReadTimeout);
                continue;
            }

            match Pin::new(&mut this.stream).poll_next(cx) {
                Poll::Ready(Some(Ok(mut frame))) => {
                    let remaining = this.limit.saturating_sub(this.received);
                    if (frame.len() as u64) > remaining {
                        frame.truncate(remaining as usize);
                        this.error = Some(ProtocolError::SizeExceeded);
                    }
                    this.received += frame.len() as u64;
                    this.buf = frame;
                }
                Poll::Ready(None) => {
                    this.eof = true;
                }
                Poll::Ready(Some(Err(err))) => {
                    tracing::warn!(error = %err, "request body read failed");
                    this.error = Some(ProtocolError::ConnectionReset);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CancelCause;
    use tokio::io::AsyncReadExt;
    use tokio_util::sync::CancellationToken;

    fn test_ctx() -> RequestContext {
        RequestContext::new(&CancellationToken::new(), Duration::from_millis(1))
    }

    fn reader_over(chunks: Vec<&'static [u8]>, limit: u64, ctx: RequestContext) -> BodyReader {
        let stream =
            futures::stream::iter(chunks.into_iter().map(|c| Ok::<_, io::Error>(Bytes::from(c))));
        BodyReader::new(
            Body::from_stream(stream),
            limit,
            ctx,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_reads_whole_body_within_limit() {
        let mut reader = reader_over(vec![b"hello ", b"world"], 64, test_ctx());
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello world");
        assert_eq!(reader.bytes_read(), 11);
        assert!(reader.take_error().is_none());
    }

    #[tokio::test]
    async fn test_overrun_truncates_and_records_size_exceeded() {
        let mut reader = reader_over(vec![b"hello ", b"world"], 8, test_ctx());
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        // Bytes within the budget are still delivered.
        assert_eq!(out, b"hello wo");
        assert_eq!(
            reader.take_error().map(|e| e.code()),
            Some("ERR_UPLOAD_SIZE_EXCEEDED")
        );
    }

    #[tokio::test]
    async fn test_cancellation_surfaces_cause_as_terminal_error() {
        let ctx = test_ctx();
        // A pending stream that never yields: the read must end via the
        // cancellation, not the data path.
        let stream = futures::stream::pending::<Result<Bytes, io::Error>>();
        let mut reader = BodyReader::new(
            Body::from_stream(stream),
            64,
            ctx.clone(),
            Duration::from_secs(30),
        );

        ctx.cancel_with(CancelCause::Interrupted);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(
            reader.take_error().map(|e| e.code()),
            Some("ERR_UPLOAD_INTERRUPTED")
        );
    }

    #[tokio::test]
    async fn test_idle_deadline_records_read_timeout() {
        let stream = futures::stream::pending::<Result<Bytes, io::Error>>();
        let mut reader = BodyReader::new(
            Body::from_stream(stream),
            64,
            test_ctx(),
            Duration::from_millis(30),
        );

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(reader.take_error().map(|e| e.code()), Some("ERR_READ_TIMEOUT"));
    }

    #[tokio::test]
    async fn test_transport_error_maps_to_connection_reset() {
        let stream = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ]);
        let mut reader = BodyReader::new(
            Body::from_stream(stream),
            64,
            test_ctx(),
            Duration::from_secs(5),
        );

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"abc");
        assert_eq!(
            reader.take_error().map(|e| e.code()),
            Some("ERR_CONNECTION_RESET")
        );
    }
}
