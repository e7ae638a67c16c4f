//! Asynchronous notification fan-out.
//!
//! Four event channels cover the upload lifecycle: created, progress,
//! complete, terminated. Each channel exists only when its config flag is
//! set, and has capacity 1: emission awaits channel capacity, so a slow
//! consumer back-pressures the emitting request. This is deliberate. If the
//! consumer half has been dropped, events are discarded (with a warning)
//! instead of stalling the request forever.
//!
//! Per-upload ordering is total: created < progress… < complete|terminated,
//! because all emissions for one upload happen from its serialized handlers.

use freight_core::HookEvent;
use freight_core::config::NotifyConfig;
use tokio::sync::mpsc;

/// Sender half of the notification channels. Cloned into every handler.
#[derive(Clone, Default)]
pub struct Notifier {
    created: Option<mpsc::Sender<HookEvent>>,
    progress: Option<mpsc::Sender<HookEvent>>,
    complete: Option<mpsc::Sender<HookEvent>>,
    terminated: Option<mpsc::Sender<HookEvent>>,
}

/// Receiver half, handed to the embedding application at construction.
pub struct NotificationStreams {
    pub created_uploads: Option<mpsc::Receiver<HookEvent>>,
    pub upload_progress: Option<mpsc::Receiver<HookEvent>>,
    pub complete_uploads: Option<mpsc::Receiver<HookEvent>>,
    pub terminated_uploads: Option<mpsc::Receiver<HookEvent>>,
}

fn gated(enabled: bool) -> (Option<mpsc::Sender<HookEvent>>, Option<mpsc::Receiver<HookEvent>>) {
    if enabled {
        let (tx, rx) = mpsc::channel(1);
        (Some(tx), Some(rx))
    } else {
        (None, None)
    }
}

impl Notifier {
    /// Create the channels enabled by `flags`.
    pub fn new(flags: NotifyConfig) -> (Self, NotificationStreams) {
        let (created_tx, created_rx) = gated(flags.created_uploads);
        let (progress_tx, progress_rx) = gated(flags.upload_progress);
        let (complete_tx, complete_rx) = gated(flags.complete_uploads);
        let (terminated_tx, terminated_rx) = gated(flags.terminated_uploads);

        (
            Self {
                created: created_tx,
                progress: progress_tx,
                complete: complete_tx,
                terminated: terminated_tx,
            },
            NotificationStreams {
                created_uploads: created_rx,
                upload_progress: progress_rx,
                complete_uploads: complete_rx,
                terminated_uploads: terminated_rx,
            },
        )
    }

    async fn emit(channel: &Option<mpsc::Sender<HookEvent>>, kind: &str, event: HookEvent) {
        if let Some(tx) = channel
            && tx.send(event).await.is_err()
        {
            tracing::warn!(kind, "notification consumer gone, event dropped");
        }
    }

    pub async fn created(&self, event: HookEvent) {
        Self::emit(&self.created, "created", event).await;
    }

    pub async fn progress(&self, event: HookEvent) {
        Self::emit(&self.progress, "progress", event).await;
    }

    pub async fn complete(&self, event: HookEvent) {
        Self::emit(&self.complete, "complete", event).await;
    }

    pub async fn terminated(&self, event: HookEvent) {
        Self::emit(&self.terminated, "terminated", event).await;
    }
}
