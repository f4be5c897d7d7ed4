//! Concurrency permits
//!
//! One global pool bounds tests in flight. Tests under a legacy root also take
//! a single-slot pool keyed by their parent directory. The directory permit is
//! acquired first and released last, so a test never sits on a global slot
//! while waiting for its directory.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use super::AbortSignal;
use crate::models::TestId;

/// Permits held for one attempt.
///
/// Fields drop in declaration order: global first, then directory.
#[derive(Debug)]
pub struct AttemptPermit {
    global: Option<OwnedSemaphorePermit>,
    directory: Option<OwnedSemaphorePermit>,
}

impl AttemptPermit {
    /// Give the global slot back early, keeping directory exclusivity
    pub fn release_global(&mut self) {
        self.global.take();
    }

    pub fn holds_directory(&self) -> bool {
        self.directory.is_some()
    }
}

/// Global and per-directory permit pools
#[derive(Debug)]
pub struct ConcurrencyPermits {
    global: Arc<Semaphore>,
    directories: Mutex<HashMap<PathBuf, Arc<Semaphore>>>,
    legacy_roots: Vec<String>,
}

impl ConcurrencyPermits {
    pub fn new(concurrency: usize, legacy_roots: &[String]) -> Self {
        let legacy_roots = legacy_roots
            .iter()
            .map(|root| {
                let root = TestId::new(root);
                format!("{}/", root.as_str())
            })
            .collect();

        Self {
            global: Arc::new(Semaphore::new(concurrency.max(1))),
            directories: Mutex::new(HashMap::new()),
            legacy_roots,
        }
    }

    /// Directory that serializes this test, if it is a legacy test
    pub fn directory_key(&self, id: &TestId) -> Option<PathBuf> {
        self.legacy_roots
            .iter()
            .any(|root| id.as_str().starts_with(root.as_str()))
            .then(|| id.parent_dir())
    }

    async fn directory_pool(&self, key: PathBuf) -> Arc<Semaphore> {
        let mut pools = self.directories.lock().await;
        pools
            .entry(key)
            .or_insert_with_key(|key| {
                debug!("Creating serial pool for {}", key.display());
                Arc::new(Semaphore::new(1))
            })
            .clone()
    }

    /// Acquire everything one attempt of `id` needs; `None` once aborted
    pub async fn acquire(&self, id: &TestId, abort: &AbortSignal) -> Option<AttemptPermit> {
        let directory = match self.directory_key(id) {
            Some(key) => {
                let pool = self.directory_pool(key).await;
                Some(acquire_or_abort(pool, abort).await?)
            }
            None => None,
        };

        let global = acquire_or_abort(self.global.clone(), abort).await?;

        Some(AttemptPermit {
            global: Some(global),
            directory,
        })
    }

    pub fn available(&self) -> usize {
        self.global.available_permits()
    }
}

async fn acquire_or_abort(
    pool: Arc<Semaphore>,
    abort: &AbortSignal,
) -> Option<OwnedSemaphorePermit> {
    if abort.is_aborted() {
        return None;
    }

    tokio::select! {
        biased;
        _ = abort.aborted() => None,
        permit = pool.acquire_owned() => permit.ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn permits() -> ConcurrencyPermits {
        ConcurrencyPermits::new(2, &["test/legacy".to_string()])
    }

    #[test]
    fn test_directory_key() {
        let permits = permits();
        assert_eq!(
            permits.directory_key(&TestId::new("test/legacy/a/one.test.js")),
            Some(PathBuf::from("test/legacy/a"))
        );
        assert_eq!(permits.directory_key(&TestId::new("test/unit/one.test.js")), None);
        assert_eq!(permits.directory_key(&TestId::new("test/legacyish/one.test.js")), None);
    }

    #[tokio::test]
    async fn test_release_order() {
        let permits = permits();
        let abort = AbortSignal::new();

        let mut permit = permits
            .acquire(&TestId::new("test/legacy/a/one.test.js"), &abort)
            .await
            .unwrap();
        assert!(permit.holds_directory());
        assert_eq!(permits.available(), 1);

        permit.release_global();
        assert_eq!(permits.available(), 2);

        // Directory still held: a sibling cannot start yet.
        let sibling = tokio::time::timeout(
            Duration::from_millis(50),
            permits.acquire(&TestId::new("test/legacy/a/two.test.js"), &abort),
        )
        .await;
        assert!(sibling.is_err());

        drop(permit);
        let sibling = permits
            .acquire(&TestId::new("test/legacy/a/two.test.js"), &abort)
            .await;
        assert!(sibling.is_some());
    }

    #[tokio::test]
    async fn test_abort_releases_waiters() {
        let permits = Arc::new(ConcurrencyPermits::new(1, &[]));
        let abort = AbortSignal::new();

        let held = permits.acquire(&TestId::new("a.test.js"), &abort).await;
        assert!(held.is_some());

        let waiter = {
            let permits = permits.clone();
            let abort = abort.clone();
            tokio::spawn(async move { permits.acquire(&TestId::new("b.test.js"), &abort).await })
        };

        abort.trigger();
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_none());
    }
}
