//! Cancellation for in-flight fetches.
//!
//! An [`AbortController`] hands out [`AbortSignal`]s; a fetcher given a signal
//! races the request against it and drops the request once it fires.
//! [`AbortController::abort_after`] arms a deadline timer whose guard cancels
//! the timer when dropped, so a fetch that settles in time leaves nothing behind.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Owner side of an abort signal.
#[derive(Debug, Clone)]
pub struct AbortController {
    tx: Arc<watch::Sender<bool>>,
}

/// Observer side handed to a fetcher.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

/// Pending deadline armed by [`AbortController::abort_after`]. Dropping it disarms the timer.
#[derive(Debug)]
pub struct Deadline {
    timer: JoinHandle<()>,
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortController {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn signal(&self) -> AbortSignal {
        AbortSignal { rx: self.tx.subscribe() }
    }

    /// Abort every fetch observing this controller's signals.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    /// Abort once `after` has elapsed, unless the returned guard is dropped first.
    pub fn abort_after(&self, after: Duration) -> Deadline {
        let controller = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            tracing::debug!(after_ms = after.as_millis() as u64, "deadline expired, aborting fetch");
            controller.abort();
        });
        Deadline { timer }
    }
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the signal is aborted. Never resolves if the controller
    /// is dropped without aborting.
    pub async fn aborted(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|aborted| *aborted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
