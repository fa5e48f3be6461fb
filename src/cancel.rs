//! Cooperative cancellation
//!
//! A cheap clonable token the orchestrator races against every suspension
//! point (network requests, subprocess invocations, LLM calls, retry
//! sleeps). The CLI trips it from the ctrl-c handler, so an in-flight run
//! stops at its next await and surfaces as a `Cancelled` pipeline error
//! instead of being torn down mid-write.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Clonable cancellation flag shared between the signal handler and the
/// pipeline
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the token. Idempotent; wakes every waiter.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether the token has been tripped.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once the token is tripped.
    pub async fn cancelled(&self) {
        loop {
            // Create the listener before re-checking the flag so a cancel()
            // between the check and the await cannot be missed.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
