//! Timing recorder
//!
//! Collects the durations of passing attempts during a run and reconciles
//! them with the fetched ledger at the end.

use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{PersistError, TimingLedger, TimingStore};
use crate::models::TestId;

/// In-memory durations of the current run
#[derive(Debug, Default)]
pub struct TimingRecorder {
    current: Mutex<TimingLedger>,
}

impl TimingRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished attempt; the last write for an identifier wins
    pub async fn record(&self, id: &TestId, elapsed: Duration) {
        self.current.lock().await.insert(id, elapsed.as_secs_f64());
    }

    /// Durations recorded so far
    pub async fn snapshot(&self) -> TimingLedger {
        self.current.lock().await.clone()
    }

    /// Merge into `previous`, prune vanished tests, and publish.
    ///
    /// Publishing is best-effort: failures are logged and returned, never
    /// escalated by the caller.
    pub async fn publish<S: TimingStore>(
        &self,
        previous: Option<&TimingLedger>,
        root: &Path,
        store: &S,
    ) -> Result<TimingLedger, PersistError> {
        let mut merged = previous.cloned().unwrap_or_default();
        merged.merge(&*self.current.lock().await);

        let pruned = merged.prune_missing(root);
        if pruned > 0 {
            info!("Pruned {} timing entries for removed tests", pruned);
        }

        let blob = merged.encode()?;
        match store.put(blob).await {
            Ok(()) => {
                info!(
                    "Published {} timing entries to {}",
                    merged.len(),
                    store.describe()
                );
                Ok(merged)
            }
            Err(e) => {
                warn!("Failed to publish timings to {}: {}", store.describe(), e);
                Err(e)
            }
        }
    }
}
