//! Run-wide abort signal
//!
//! Triggered once when a test exhausts its retries without continue-on-error
//! (or on Ctrl-C). Permit waits and subprocess waits observe it.

use std::sync::Arc;
use tokio::sync::watch;

/// Shared abort flag with async notification
#[derive(Clone, Debug)]
pub struct AbortSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Abort the run; idempotent
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the run has been aborted
    pub async fn aborted(&self) {
        let mut rx = self.tx.subscribe();
        // `self` keeps the sender alive, so the channel cannot close here.
        let _ = rx.wait_for(|aborted| *aborted).await;
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}
