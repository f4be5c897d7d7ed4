//! Timing ledger stores
//!
//! A store is a key-value blob get/put. The local file store doubles as a
//! cache; the HTTP store talks to a remote endpoint with GET and PUT.

use reqwest::{Client, StatusCode};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use super::PersistError;
use crate::config::TimingsConfig;

/// Blob storage for the timing ledger
pub trait TimingStore {
    /// Fetch the stored blob, `None` when nothing has been published yet
    fn get(&self) -> impl Future<Output = Result<Option<Vec<u8>>, PersistError>> + Send;

    /// Replace the stored blob
    fn put(&self, blob: Vec<u8>) -> impl Future<Output = Result<(), PersistError>> + Send;

    /// Human-readable location for logs
    fn describe(&self) -> String;
}

/// Ledger kept in a local file
#[derive(Clone, Debug)]
pub struct FileTimingStore {
    path: PathBuf,
}

impl FileTimingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TimingStore for FileTimingStore {
    async fn get(&self) -> Result<Option<Vec<u8>>, PersistError> {
        match tokio::fs::read(&self.path).await {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PersistError::Io(e)),
        }
    }

    async fn put(&self, blob: Vec<u8>) -> Result<(), PersistError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, blob).await?;
        debug!("Wrote timing ledger to {}", self.path.display());
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Ledger kept behind an HTTP endpoint
#[derive(Clone, Debug)]
pub struct HttpTimingStore {
    client: Client,
    url: String,
}

impl HttpTimingStore {
    pub fn new(url: impl Into<String>, timeout_secs: u64) -> Result<Self, PersistError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl TimingStore for HttpTimingStore {
    async fn get(&self) -> Result<Option<Vec<u8>>, PersistError> {
        let response = self.client.get(&self.url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = response.error_for_status()?;
        Ok(Some(response.bytes().await?.to_vec()))
    }

    async fn put(&self, blob: Vec<u8>) -> Result<(), PersistError> {
        self.client
            .put(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(blob)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Store selected from configuration
#[derive(Clone, Debug)]
pub enum TimingBackend {
    File(FileTimingStore),
    Http(HttpTimingStore),
}

impl TimingBackend {
    /// HTTP when a URL is configured, otherwise the local cache file
    pub fn from_config(config: &TimingsConfig, root: &std::path::Path) -> Result<Self, PersistError> {
        match &config.url {
            Some(url) => Ok(TimingBackend::Http(HttpTimingStore::new(
                url.clone(),
                config.timeout_secs,
            )?)),
            None => Ok(TimingBackend::File(FileTimingStore::new(
                root.join(&config.cache_file),
            ))),
        }
    }
}

impl TimingStore for TimingBackend {
    async fn get(&self) -> Result<Option<Vec<u8>>, PersistError> {
        match self {
            TimingBackend::File(store) => store.get().await,
            TimingBackend::Http(store) => store.get().await,
        }
    }

    async fn put(&self, blob: Vec<u8>) -> Result<(), PersistError> {
        match self {
            TimingBackend::File(store) => store.put(blob).await,
            TimingBackend::Http(store) => store.put(blob).await,
        }
    }

    fn describe(&self) -> String {
        match self {
            TimingBackend::File(store) => store.describe(),
            TimingBackend::Http(store) => store.describe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = tempdir().unwrap();
        let store = FileTimingStore::new(dir.path().join("nested/timings.json"));

        assert!(store.get().await.unwrap().is_none());

        store.put(b"{\"a\": 1.0}".to_vec()).await.unwrap();
        assert_eq!(store.get().await.unwrap(), Some(b"{\"a\": 1.0}".to_vec()));
    }

    #[test]
    fn test_backend_selection() {
        let root = std::path::Path::new("/repo");
        let file = TimingBackend::from_config(&TimingsConfig::default(), root).unwrap();
        assert!(matches!(file, TimingBackend::File(_)));
        assert_eq!(file.describe(), "/repo/.testshard/timings.json");

        let config = TimingsConfig {
            url: Some("http://127.0.0.1:9/ledger".to_string()),
            ..Default::default()
        };
        let http = TimingBackend::from_config(&config, root).unwrap();
        assert!(matches!(http, TimingBackend::Http(_)));
    }
}
