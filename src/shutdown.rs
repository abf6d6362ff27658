//! Graceful shutdown coordination
//!
//! A [`ShutdownCoordinator`] is created in `main`, triggered by Ctrl+C and
//! shared with the executor. Segments already saved stay intact; the segment
//! in flight is dropped without touching its partition.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Shared handle to a shutdown coordinator.
pub type SharedShutdown = Arc<ShutdownCoordinator>;

/// Broadcasts a one-shot shutdown request to async tasks.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    requested: AtomicBool,
    notify: Notify,
}

impl ShutdownCoordinator {
    /// Create a new coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new shared coordinator.
    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Request shutdown; waiters are woken once.
    pub fn request_shutdown(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Wait until shutdown is requested.
    pub async fn wait_for_shutdown(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent request is not missed
        notified.as_mut().enable();
        if self.is_shutdown_requested() {
            return;
        }
        notified.await;
    }

    /// Drive `fut` to completion unless shutdown is requested first.
    ///
    /// Returns `None` when cancelled; the future is dropped mid-flight, which
    /// interrupts pacing and backoff sleeps.
    pub async fn run_until_shutdown<F: Future>(&self, fut: F) -> Option<F::Output> {
        if self.is_shutdown_requested() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.wait_for_shutdown() => None,
            out = fut => Some(out),
        }
    }
}
