//! Per-request cancellation context.
//!
//! Each request carries three cancellation layers:
//!
//! 1. the hyper request future itself, dropped on client disconnect;
//! 2. a cancellable layer *with cause* ([`RequestContext::cancel_with`]),
//!    triggered when a hook stops the upload, a peer preempts the lock, or
//!    the server shuts down;
//! 3. a delayed layer that fires a grace period after (2), giving the store
//!    time to finalize in-flight state.
//!
//! Body reads observe layer 2 (the body reader converts the recorded cause
//! into its terminal error); store writes run on a spawned task bounded by
//! layer 3.

use crate::error::ProtocolError;
use freight_core::ResponseFragment;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Why a request context was cancelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelCause {
    /// A hook invoked the upload's stop handle.
    Stopped,
    /// A peer requested this request's upload lock.
    Interrupted,
    /// The server is shutting down.
    Shutdown,
}

struct ContextInner {
    cancel: CancellationToken,
    delayed: CancellationToken,
    cause: Mutex<Option<CancelCause>>,
    stop_response: Mutex<Option<ResponseFragment>>,
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        // The last holder is gone, so nothing can still be waiting on the
        // grace period; release both layers and let the watchdog exit.
        self.cancel.cancel();
        self.delayed.cancel();
    }
}

/// Cancellation state shared by everything serving one request.
#[derive(Clone)]
pub struct RequestContext {
    inner: Arc<ContextInner>,
}

impl RequestContext {
    /// Build the context for one request. `shutdown` is the server-wide
    /// shutdown token; its cancellation propagates into layer 2 with cause
    /// [`CancelCause::Shutdown`]. The delayed layer fires `grace` after
    /// layer 2.
    pub fn new(shutdown: &CancellationToken, grace: Duration) -> Self {
        let cancel = shutdown.child_token();
        let delayed = CancellationToken::new();

        {
            let cancel = cancel.clone();
            let delayed = delayed.clone();
            tokio::spawn(async move {
                cancel.cancelled().await;
                tokio::select! {
                    _ = tokio::time::sleep(grace) => delayed.cancel(),
                    _ = delayed.cancelled() => {}
                }
            });
        }

        Self {
            inner: Arc::new(ContextInner {
                cancel,
                delayed,
                cause: Mutex::new(None),
                stop_response: Mutex::new(None),
            }),
        }
    }

    /// Cancel layer 2 with the given cause. The first cause wins.
    pub fn cancel_with(&self, cause: CancelCause) {
        {
            let mut slot = self.inner.cause.lock().expect("cause slot poisoned");
            if slot.is_none() {
                *slot = Some(cause);
            }
        }
        self.inner.cancel.cancel();
    }

    /// The cancellable-with-cause layer.
    pub fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// The delayed layer, for store-side work that may outlive layer 2.
    pub fn delayed_token(&self) -> CancellationToken {
        self.inner.delayed.clone()
    }

    /// The recorded cause, if cancelled. A cancellation inherited from the
    /// shutdown token without an explicit cause classifies as `Shutdown`.
    pub fn cause(&self) -> Option<CancelCause> {
        let recorded = *self.inner.cause.lock().expect("cause slot poisoned");
        match recorded {
            Some(cause) => Some(cause),
            None if self.inner.cancel.is_cancelled() => Some(CancelCause::Shutdown),
            None => None,
        }
    }

    /// Store the response fragment supplied with a stop request.
    pub fn set_stop_response(&self, fragment: Option<ResponseFragment>) {
        *self
            .inner
            .stop_response
            .lock()
            .expect("stop response slot poisoned") = fragment;
    }

    /// Convert the recorded cause into its protocol error. Defaults to
    /// `UploadInterrupted` when called on a context without a cause, which
    /// only happens if cancellation raced the read path.
    pub fn cause_error(&self) -> ProtocolError {
        match self.cause() {
            Some(CancelCause::Stopped) => ProtocolError::UploadStopped {
                response: self
                    .inner
                    .stop_response
                    .lock()
                    .expect("stop response slot poisoned")
                    .take(),
            },
            Some(CancelCause::Shutdown) => ProtocolError::ServerShutdown,
            Some(CancelCause::Interrupted) | None => ProtocolError::UploadInterrupted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_context(grace_ms: u64) -> RequestContext {
        let shutdown = CancellationToken::new();
        RequestContext::new(&shutdown, Duration::from_millis(grace_ms))
    }

    #[tokio::test]
    async fn test_cancel_with_records_first_cause() {
        let ctx = test_context(1);
        assert_eq!(ctx.cause(), None);

        ctx.cancel_with(CancelCause::Stopped);
        ctx.cancel_with(CancelCause::Interrupted);
        assert_eq!(ctx.cause(), Some(CancelCause::Stopped));
        assert!(ctx.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_delayed_layer_fires_after_grace() {
        let ctx = test_context(20);
        ctx.cancel_with(CancelCause::Interrupted);

        assert!(!ctx.delayed_token().is_cancelled());
        tokio::time::timeout(Duration::from_secs(1), ctx.delayed_token().cancelled())
            .await
            .expect("delayed layer never fired");
    }

    #[tokio::test]
    async fn test_shutdown_classifies_without_explicit_cause() {
        let shutdown = CancellationToken::new();
        let ctx = RequestContext::new(&shutdown, Duration::from_millis(1));
        shutdown.cancel();

        ctx.cancel_token().cancelled().await;
        assert_eq!(ctx.cause(), Some(CancelCause::Shutdown));
        assert_eq!(ctx.cause_error().code(), "ERR_SERVER_SHUTDOWN");
    }

    #[tokio::test]
    async fn test_stop_response_travels_with_cause() {
        let ctx = test_context(1);
        ctx.set_stop_response(Some(ResponseFragment {
            status: Some(409),
            ..Default::default()
        }));
        ctx.cancel_with(CancelCause::Stopped);

        match ctx.cause_error() {
            ProtocolError::UploadStopped { response } => {
                assert_eq!(response.unwrap().status, Some(409));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
