//! Timing history
//!
//! Fetches the historical ledger used for balanced partitioning, records the
//! current run's durations, and publishes the merged ledger afterwards.

mod ledger;
mod recorder;
mod store;

pub use ledger::TimingLedger;
pub use recorder::TimingRecorder;
pub use store::{FileTimingStore, HttpTimingStore, TimingBackend, TimingStore};

use clap::ValueEnum;
use thiserror::Error;
use tracing::{info, warn};

/// Timing persistence errors
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Timing store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timing store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to decode timing ledger: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Failed to encode timing ledger: {0}")]
    Encode(#[source] serde_json::Error),
}

/// How the run uses timing history
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum TimingsMode {
    /// No history; contiguous partitioning
    #[default]
    Off,
    /// Fetch history for balanced partitioning
    Fetch,
    /// Fetch history and publish the merged ledger after the run
    Write,
}

impl TimingsMode {
    pub fn fetches(self) -> bool {
        !matches!(self, TimingsMode::Off)
    }

    pub fn writes(self) -> bool {
        matches!(self, TimingsMode::Write)
    }
}

/// Fetch the ledger; any failure degrades to "no history"
pub async fn fetch_ledger<S: TimingStore>(store: &S) -> Option<TimingLedger> {
    let blob = match store.get().await {
        Ok(Some(blob)) => blob,
        Ok(None) => {
            info!("No timing history at {}", store.describe());
            return None;
        }
        Err(e) => {
            warn!("Failed to fetch timings from {}: {}", store.describe(), e);
            return None;
        }
    };

    match TimingLedger::decode(&blob) {
        Ok(ledger) => {
            info!(
                "Loaded {} timing entries from {}",
                ledger.len(),
                store.describe()
            );
            Some(ledger)
        }
        Err(e) => {
            warn!("Ignoring unreadable timings from {}: {}", store.describe(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_timings_mode() {
        assert!(!TimingsMode::Off.fetches());
        assert!(TimingsMode::Fetch.fetches());
        assert!(!TimingsMode::Fetch.writes());
        assert!(TimingsMode::Write.fetches());
        assert!(TimingsMode::Write.writes());
    }

    #[tokio::test]
    async fn test_fetch_missing_and_corrupt() {
        let dir = tempdir().unwrap();
        let store = FileTimingStore::new(dir.path().join("timings.json"));
        assert!(fetch_ledger(&store).await.is_none());

        store.put(b"garbage".to_vec()).await.unwrap();
        assert!(fetch_ledger(&store).await.is_none());

        store.put(br#"{"a.test.js": 2.0}"#.to_vec()).await.unwrap();
        let ledger = fetch_ledger(&store).await.unwrap();
        assert_eq!(ledger.len(), 1);
    }
}
