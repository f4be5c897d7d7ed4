//! Timing ledger
//!
//! Maps test identifiers to their last known duration in seconds.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::PersistError;
use crate::models::TestId;

/// Identifier → duration estimate (seconds)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimingLedger {
    entries: BTreeMap<String, f64>,
}

impl TimingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &TestId) -> Option<f64> {
        self.entries.get(id.as_str()).copied()
    }

    pub fn insert(&mut self, id: &TestId, secs: f64) {
        self.entries.insert(id.as_str().to_string(), secs);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Overlay newer durations; entries in `other` win
    pub fn merge(&mut self, other: &TimingLedger) {
        for (id, secs) in &other.entries {
            self.entries.insert(id.clone(), *secs);
        }
    }

    /// Drop entries whose test file no longer exists under `root`.
    ///
    /// Returns the number of pruned entries.
    pub fn prune_missing(&mut self, root: &Path) -> usize {
        let before = self.entries.len();
        self.entries.retain(|id, _| root.join(id).is_file());
        before - self.entries.len()
    }

    pub fn decode(blob: &[u8]) -> Result<Self, PersistError> {
        serde_json::from_slice(blob).map_err(PersistError::Decode)
    }

    pub fn encode(&self) -> Result<Vec<u8>, PersistError> {
        serde_json::to_vec_pretty(self).map_err(PersistError::Encode)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl<'a> FromIterator<(&'a str, f64)> for TimingLedger {
    fn from_iter<I: IntoIterator<Item = (&'a str, f64)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(id, secs)| (TestId::new(id).as_str().to_string(), secs))
                .collect(),
        }
    }
}
