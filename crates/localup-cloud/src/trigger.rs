//! Coalescing update trigger
//!
//! Any number of callers can ask for "send a status update soon" without
//! blocking. Requests made while one is already pending collapse into it, so
//! the main loop wakes at most once per drain.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Sending half, held by the manager and used by every caller
#[derive(Debug, Clone)]
pub struct UpdateTrigger {
    tx: mpsc::Sender<()>,
}

/// Receiving half, consumed only by the main loop
#[derive(Debug)]
pub struct UpdateSignal {
    rx: mpsc::Receiver<()>,
}

/// Create a connected trigger/signal pair with a single pending slot
pub fn update_channel() -> (UpdateTrigger, UpdateSignal) {
    let (tx, rx) = mpsc::channel(1);
    (UpdateTrigger { tx }, UpdateSignal { rx })
}

impl UpdateTrigger {
    /// Request an update; never blocks
    ///
    /// Returns `true` if this call armed the trigger, `false` if an update was
    /// already pending (or the loop is gone).
    pub fn arm(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => false,
            Err(TrySendError::Closed(())) => false,
        }
    }
}

impl UpdateSignal {
    /// Clear a pending request without waiting; returns whether one was pending
    pub fn drain(&mut self) -> bool {
        self.rx.try_recv().is_ok()
    }

    /// Wait until the trigger is armed, consuming the request
    ///
    /// Pends forever if every trigger has been dropped, so it can sit in a
    /// `select!` next to the timeout and cancellation branches.
    pub async fn armed(&mut self) {
        if self.rx.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}
