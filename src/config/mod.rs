//! Configuration module
//!
//! Handles loading and managing configuration.

mod env;
mod file;

pub use env::{print_env_help, EnvConfig};
pub use file::ConfigFile;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Command that runs a single test; the test identifier is appended
    pub command: Vec<String>,

    /// Regexes a relative path must match to be considered a test
    pub test_patterns: Vec<String>,

    /// Directory names skipped while scanning
    pub exclude_dirs: Vec<String>,

    /// Named test categories
    pub categories: Vec<Category>,

    /// Roots whose tests run one at a time per directory
    pub legacy_roots: Vec<String>,

    /// Directory names that hold fixtures rather than tests
    pub fixture_dir_names: Vec<String>,

    /// Maximum concurrent tests
    pub concurrency: usize,

    /// Retries per failing test
    pub retries: u32,

    /// Largest accepted group total
    pub max_groups: usize,

    /// Manifest of tests that are never retried
    pub skip_retry_file: Option<PathBuf>,

    /// Where tests write their structured JSON results
    pub reports_dir: PathBuf,

    /// Where tests leave trace artifacts
    pub trace_dir: PathBuf,

    /// Subprocess environment
    pub env: EnvSettings,

    /// Timing history
    pub timings: TimingsConfig,

    /// Installation step for isolated categories
    pub provision: ProvisionConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            command: vec!["node".to_string(), "--test".to_string()],
            test_patterns: vec![r"\.(test|spec)\.[cm]?[jt]sx?$".to_string()],
            exclude_dirs: vec!["node_modules".to_string(), ".git".to_string()],
            categories: Vec::new(),
            legacy_roots: Vec::new(),
            fixture_dir_names: vec!["fixtures".to_string(), "__fixtures__".to_string()],
            concurrency: 4,
            retries: 0,
            max_groups: 64,
            skip_retry_file: None,
            reports_dir: PathBuf::from(".testshard/reports"),
            trace_dir: PathBuf::from(".testshard/traces"),
            env: EnvSettings::default(),
            timings: TimingsConfig::default(),
            provision: ProvisionConfig::default(),
        }
    }
}

impl AppConfig {
    /// Look up a category by name
    pub fn category(&self, name: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.name == name)
    }
}

/// A named group of tests, selected by path prefix or regex
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,

    /// Relative path prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Regex over the relative path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// Tests in this category need a provisioned installation
    #[serde(default)]
    pub isolated: bool,
}

impl Category {
    pub fn with_prefix(name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: Some(prefix.into()),
            pattern: None,
            isolated: false,
        }
    }

    pub fn with_pattern(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: None,
            pattern: Some(pattern.into()),
            isolated: false,
        }
    }

    pub fn isolated(mut self) -> Self {
        self.isolated = true;
        self
    }
}

/// Environment handed to every test subprocess
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvSettings {
    /// Variables always set
    pub set: BTreeMap<String, String>,

    /// Variables removed from the inherited environment
    pub clear: Vec<String>,

    /// Extra variables for the first attempt only
    pub first_attempt: BTreeMap<String, String>,

    /// Extra variables for retries only
    pub retry: BTreeMap<String, String>,
}

impl Default for EnvSettings {
    fn default() -> Self {
        let set = [
            ("HEADLESS", "1"),
            ("NONINTERACTIVE", "1"),
            ("DO_NOT_TRACK", "1"),
            ("TELEMETRY_DISABLED", "1"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let clear = ["CI", "CONTINUOUS_INTEGRATION", "BUILD_NUMBER", "RUN_ID", "GITHUB_ACTIONS"]
            .into_iter()
            .map(String::from)
            .collect();

        Self {
            set,
            clear,
            first_attempt: BTreeMap::new(),
            retry: BTreeMap::new(),
        }
    }
}

/// Timing history configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingsConfig {
    /// Local ledger file used when no URL is configured
    pub cache_file: PathBuf,

    /// Remote blob URL (GET to fetch, PUT to publish)
    pub url: Option<String>,

    /// HTTP timeout in seconds
    pub timeout_secs: u64,
}

impl Default for TimingsConfig {
    fn default() -> Self {
        Self {
            cache_file: PathBuf::from(".testshard/timings.json"),
            url: None,
            timeout_secs: 30,
        }
    }
}

/// Provisioning commands for isolated categories
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Prints `{"install_dir": ..., "package_paths": {...}}` on stdout
    pub setup: Vec<String>,

    /// Run once at the end of the run, after tests finish
    pub teardown: Vec<String>,
}

impl ProvisionConfig {
    pub fn is_configured(&self) -> bool {
        !self.setup.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.retries, 0);
        assert!(config.exclude_dirs.contains(&"node_modules".to_string()));
    }

    #[test]
    fn test_default_env_clears_ci_markers() {
        let env = EnvSettings::default();
        assert!(env.clear.contains(&"CI".to_string()));
        assert_eq!(env.set.get("DO_NOT_TRACK").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_category_lookup() {
        let config = AppConfig {
            categories: vec![
                Category::with_prefix("legacy", "test/legacy/"),
                Category::with_pattern("isolated", "^test/isolated/").isolated(),
            ],
            ..Default::default()
        };

        assert!(config.category("legacy").is_some());
        assert!(config.category("isolated").map(|c| c.isolated).unwrap_or(false));
        assert!(config.category("missing").is_none());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: AppConfig = serde_yaml::from_str("concurrency: 8\n").unwrap();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.max_groups, 64);
    }
}
