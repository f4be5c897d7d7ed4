//! Configuration file management
//!
//! Handles finding, loading, and validating configuration files.

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{AppConfig, Category, ProvisionConfig};

/// Configuration file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &[
    "./testshard.yaml",
    "./testshard.yml",
    "./.testshard.yaml",
    "./.testshard/config.yaml",
    "~/.config/testshard/config.yaml",
];

/// Full configuration file structure
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Version of config file format
    #[serde(default = "default_version")]
    pub version: String,

    /// Run settings
    #[serde(flatten)]
    pub app: AppConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            version: default_version(),
            app: AppConfig::default(),
        }
    }
}

impl ConfigFile {
    /// Find configuration file in standard locations
    pub fn find() -> Option<PathBuf> {
        CONFIG_LOCATIONS
            .iter()
            .map(|location| expand_path(location))
            .find(|path| path.exists())
    }

    /// Load configuration from default location
    pub fn load_default() -> Result<Self> {
        if let Some(path) = Self::find() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !["1.0"].contains(&self.version.as_str()) {
            anyhow::bail!("Unsupported config version: {}", self.version);
        }

        let app = &self.app;
        if app.command.is_empty() {
            anyhow::bail!("`command` must name the program that runs a single test");
        }
        if app.concurrency == 0 {
            anyhow::bail!("`concurrency` must be at least 1");
        }
        if app.max_groups == 0 {
            anyhow::bail!("`max_groups` must be at least 1");
        }

        for pattern in &app.test_patterns {
            Regex::new(pattern).with_context(|| format!("Invalid test pattern: {pattern}"))?;
        }

        for (i, category) in app.categories.iter().enumerate() {
            if app.categories[..i].iter().any(|c| c.name == category.name) {
                anyhow::bail!("Duplicate category name: {}", category.name);
            }
            match (&category.prefix, &category.pattern) {
                (Some(_), None) => {}
                (None, Some(pattern)) => {
                    Regex::new(pattern).with_context(|| {
                        format!("Invalid pattern in category '{}'", category.name)
                    })?;
                }
                _ => anyhow::bail!(
                    "Category '{}' must set exactly one of `prefix` or `pattern`",
                    category.name
                ),
            }
        }

        Ok(())
    }

    /// Generate example configuration
    pub fn example() -> Self {
        Self {
            version: default_version(),
            app: AppConfig {
                command: vec!["node".to_string(), "tools/run-test.js".to_string()],
                categories: vec![
                    Category::with_prefix("unit", "test/unit/"),
                    Category::with_prefix("legacy", "test/legacy/"),
                    Category::with_pattern("isolated", "^test/(isolated|install)/").isolated(),
                ],
                legacy_roots: vec!["test/legacy".to_string()],
                retries: 2,
                skip_retry_file: Some(PathBuf::from("test/skip-retry.txt")),
                provision: ProvisionConfig {
                    setup: vec!["node".to_string(), "tools/provision.js".to_string()],
                    teardown: Vec::new(),
                },
                ..AppConfig::default()
            },
        }
    }
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Check if file is YAML based on extension
fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}
