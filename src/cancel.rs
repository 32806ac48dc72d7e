//! Run-level cancellation.
//!
//! A [`CancelHandle`] is held by whoever may stop the run (operator Ctrl-C,
//! run timeout, the orchestrator's failure circuit). Every worker and the
//! catalog client hold a [`CancelSignal`] and check it before issuing a
//! request; waits (rate limit, backoff) race against it.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: watch::Sender<Option<String>>,
}

#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<Option<String>>,
}

/// Create a linked handle/signal pair.
pub fn channel() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(None);
    (CancelHandle { tx }, CancelSignal { rx })
}

impl CancelHandle {
    /// Cancel the run. The first reason wins.
    pub fn cancel(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Cancel with `reason` once `after` elapses. Abort the returned task to
    /// disarm.
    pub fn cancel_after(&self, after: Duration, reason: impl Into<String>) -> JoinHandle<()> {
        let handle = self.clone();
        let reason = reason.into();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            handle.cancel(reason);
        })
    }
}

impl CancelSignal {
    /// A signal that is never cancelled.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(None);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.borrow().is_some()
    }

    pub fn reason(&self) -> Option<String> {
        self.rx.borrow().clone()
    }

    /// Resolve once the run is cancelled. Pending forever otherwise.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|r| r.is_some()).await.is_err() {
            // All handles dropped without cancelling.
            std::future::pending::<()>().await;
        }
    }
}
