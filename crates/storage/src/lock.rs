//! Per-upload exclusive locks.
//!
//! Every mutating request (and HEAD, for a consistent offset snapshot) holds
//! the upload's lock for the duration of the handler. A second request for
//! the same upload may preempt the holder: the provider invokes the holder's
//! release callback, the holder cancels its work and releases, and the
//! waiter proceeds. The caller bounds the whole acquisition with its own
//! timeout.

use crate::error::StoreResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Callback invoked on the current lock holder when a peer wants the lock.
pub type RequestRelease = Arc<dyn Fn() + Send + Sync>;

/// Factory for per-upload locks.
pub trait Locker: Send + Sync + 'static {
    fn new_lock(&self, id: &str) -> Box<dyn UploadLock>;
}

/// An exclusive lock on one upload, scoped to one request.
#[async_trait]
pub trait UploadLock: Send {
    /// Acquire the lock, waiting until the current holder releases it.
    /// `release_requested` is invoked on this caller if a later peer wants
    /// the lock while this caller holds it.
    async fn acquire(&mut self, release_requested: RequestRelease) -> StoreResult<()>;

    /// Release the lock. Must be called on every exit path; releasing an
    /// unheld lock is a no-op.
    async fn release(&mut self);
}

struct Holder {
    request_release: RequestRelease,
    released: Arc<Notify>,
}

/// In-process lock provider keyed by upload ID.
#[derive(Clone, Default)]
pub struct MemoryLocker {
    locks: Arc<Mutex<HashMap<String, Holder>>>,
}

impl MemoryLocker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Locker for MemoryLocker {
    fn new_lock(&self, id: &str) -> Box<dyn UploadLock> {
        Box::new(MemoryLock {
            locks: self.locks.clone(),
            id: id.to_string(),
            held: false,
        })
    }
}

struct MemoryLock {
    locks: Arc<Mutex<HashMap<String, Holder>>>,
    id: String,
    held: bool,
}

#[async_trait]
impl UploadLock for MemoryLock {
    async fn acquire(&mut self, release_requested: RequestRelease) -> StoreResult<()> {
        loop {
            let (holder_release, released) = {
                let mut locks = self.locks.lock().expect("lock table poisoned");
                match locks.get(&self.id) {
                    None => {
                        locks.insert(
                            self.id.clone(),
                            Holder {
                                request_release: release_requested.clone(),
                                released: Arc::new(Notify::new()),
                            },
                        );
                        self.held = true;
                        return Ok(());
                    }
                    Some(holder) => {
                        (holder.request_release.clone(), holder.released.clone())
                    }
                }
            };

            // Ask the current holder to wind down, then wait for the slot.
            // The short sleep arm covers a release that happened between the
            // table check and the notify registration.
            holder_release();
            tokio::select! {
                _ = released.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(25)) => {}
            }
        }
    }

    async fn release(&mut self) {
        if !self.held {
            return;
        }
        self.held = false;

        let released = {
            let mut locks = self.locks.lock().expect("lock table poisoned");
            locks.remove(&self.id).map(|holder| holder.released)
        };
        if let Some(released) = released {
            released.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn noop_release() -> RequestRelease {
        Arc::new(|| {})
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let locker = Arc::new(MemoryLocker::new());
        let mut lock = locker.new_lock("a");
        lock.acquire(noop_release()).await.unwrap();
        lock.release().await;

        // Reacquire after release succeeds immediately.
        let mut second = locker.new_lock("a");
        second.acquire(noop_release()).await.unwrap();
        second.release().await;
    }

    #[tokio::test]
    async fn test_independent_ids_do_not_contend() {
        let locker = Arc::new(MemoryLocker::new());
        let mut a = locker.new_lock("a");
        let mut b = locker.new_lock("b");
        a.acquire(noop_release()).await.unwrap();
        b.acquire(noop_release()).await.unwrap();
        a.release().await;
        b.release().await;
    }

    #[tokio::test]
    async fn test_waiter_preempts_holder() {
        let locker = Arc::new(MemoryLocker::new());
        let preempted = Arc::new(AtomicBool::new(false));

        let mut holder = locker.new_lock("a");
        let flag = preempted.clone();
        holder
            .acquire(Arc::new(move || {
                flag.store(true, Ordering::SeqCst);
            }))
            .await
            .unwrap();

        let locker2 = locker.clone();
        let waiter = tokio::spawn(async move {
            let mut lock = locker2.new_lock("a");
            lock.acquire(Arc::new(|| {})).await.unwrap();
            lock.release().await;
        });

        // Give the waiter time to run into the held lock and request release.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(preempted.load(Ordering::SeqCst));

        holder.release().await;
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let locker = Arc::new(MemoryLocker::new());
        let mut lock = locker.new_lock("a");
        lock.acquire(noop_release()).await.unwrap();
        lock.release().await;
        lock.release().await;
    }
}
