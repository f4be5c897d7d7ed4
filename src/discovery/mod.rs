//! Test discovery and filtering
//!
//! Enumerates candidate test identifiers from explicit arguments, an
//! allow-list manifest, or a directory scan, then applies exactly one filter:
//! a named category, a free-form regex, or the "leftover" default that drops
//! everything belonging to a configured category.

use indexmap::IndexSet;
use regex::Regex;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{AppConfig, Category};
use crate::models::TestId;

/// Discovery errors
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("No tests matched the selection")]
    NoTestsMatched,

    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Failed to read manifest {}: {source}", path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Where candidate identifiers come from
#[derive(Clone, Debug)]
pub enum TestSource {
    /// Identifiers named by the caller
    Explicit(Vec<String>),
    /// One identifier per line
    Manifest(PathBuf),
    /// Recursive scan of the root
    Scan,
}

impl TestSource {
    /// Pick the highest-priority source that was supplied
    pub fn select(explicit: Vec<String>, manifest: Option<PathBuf>) -> Self {
        if !explicit.is_empty() {
            TestSource::Explicit(explicit)
        } else if let Some(path) = manifest {
            TestSource::Manifest(path)
        } else {
            TestSource::Scan
        }
    }
}

/// Which filter to apply after enumeration
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TestFilter {
    Category(String),
    Pattern(String),
    /// Everything not claimed by a configured category
    Leftover,
}

impl TestFilter {
    pub fn select(category: Option<String>, pattern: Option<String>) -> Self {
        match (category, pattern) {
            (Some(category), _) => TestFilter::Category(category),
            (None, Some(pattern)) => TestFilter::Pattern(pattern),
            (None, None) => TestFilter::Leftover,
        }
    }
}

enum RuleKind {
    Prefix(String),
    Pattern(Regex),
}

/// A compiled category rule
pub struct CategoryRule {
    pub name: String,
    pub isolated: bool,
    kind: RuleKind,
}

impl CategoryRule {
    pub fn compile(category: &Category) -> Result<Self, DiscoveryError> {
        let kind = match (&category.prefix, &category.pattern) {
            (_, Some(pattern)) => RuleKind::Pattern(compile_regex(pattern)?),
            (Some(prefix), None) => RuleKind::Prefix(normalize_prefix(prefix)),
            (None, None) => RuleKind::Prefix(String::new()),
        };

        Ok(Self {
            name: category.name.clone(),
            isolated: category.isolated,
            kind,
        })
    }

    pub fn matches(&self, id: &TestId) -> bool {
        match &self.kind {
            RuleKind::Prefix(prefix) => id.as_str().starts_with(prefix.as_str()),
            RuleKind::Pattern(regex) => regex.is_match(id.as_str()),
        }
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let prefix = prefix.replace('\\', "/");
    prefix.trim_start_matches("./").to_string()
}

fn compile_regex(pattern: &str) -> Result<Regex, DiscoveryError> {
    Regex::new(pattern).map_err(|source| DiscoveryError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Test discovery over one root directory
pub struct Discovery<'a> {
    root: &'a Path,
    config: &'a AppConfig,
}

impl<'a> Discovery<'a> {
    pub fn new(root: &'a Path, config: &'a AppConfig) -> Self {
        Self { root, config }
    }

    /// Enumerate, normalize, deduplicate and filter
    pub fn discover(
        &self,
        source: &TestSource,
        filter: &TestFilter,
    ) -> Result<Vec<TestId>, DiscoveryError> {
        let candidates = self.enumerate(source)?;
        debug!("Enumerated {} candidate tests", candidates.len());

        let selected = self.apply_filter(candidates, filter)?;
        if selected.is_empty() {
            return Err(DiscoveryError::NoTestsMatched);
        }

        info!("Selected {} tests ({:?})", selected.len(), filter);
        Ok(selected)
    }

    /// Produce normalized, deduplicated candidates in source order
    pub fn enumerate(&self, source: &TestSource) -> Result<Vec<TestId>, DiscoveryError> {
        let raw = match source {
            TestSource::Explicit(ids) => ids.clone(),
            TestSource::Manifest(path) => read_manifest(path)?,
            TestSource::Scan => self.scan()?,
        };

        let unique: IndexSet<TestId> = raw
            .iter()
            .map(TestId::new)
            .filter(|id| !id.is_empty())
            .collect();

        Ok(unique.into_iter().collect())
    }

    fn scan(&self) -> Result<Vec<String>, DiscoveryError> {
        let patterns = self
            .config
            .test_patterns
            .iter()
            .map(|p| compile_regex(p))
            .collect::<Result<Vec<_>, _>>()?;
        let excluded = &self.config.exclude_dirs;

        let walker = WalkDir::new(self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || !excluded
                        .iter()
                        .any(|name| entry.file_name().to_str() == Some(name.as_str()))
            });

        let mut found = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable path during scan: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(self.root) else {
                continue;
            };
            let relative = relative.to_string_lossy().replace('\\', "/");
            if patterns.iter().any(|p| p.is_match(&relative)) {
                found.push(relative);
            }
        }

        found.sort();
        Ok(found)
    }

    fn apply_filter(
        &self,
        candidates: Vec<TestId>,
        filter: &TestFilter,
    ) -> Result<Vec<TestId>, DiscoveryError> {
        match filter {
            TestFilter::Category(name) => {
                let category = self
                    .config
                    .category(name)
                    .ok_or_else(|| DiscoveryError::UnknownCategory(name.clone()))?;
                let rule = CategoryRule::compile(category)?;
                Ok(candidates.into_iter().filter(|id| rule.matches(id)).collect())
            }
            TestFilter::Pattern(pattern) => {
                let regex = compile_regex(pattern)?;
                Ok(candidates
                    .into_iter()
                    .filter(|id| regex.is_match(id.as_str()))
                    .collect())
            }
            TestFilter::Leftover => {
                let rules = self.category_rules()?;
                Ok(candidates
                    .into_iter()
                    .filter(|id| !rules.iter().any(|rule| rule.matches(id)))
                    .collect())
            }
        }
    }

    fn category_rules(&self) -> Result<Vec<CategoryRule>, DiscoveryError> {
        self.config
            .categories
            .iter()
            .map(CategoryRule::compile)
            .collect()
    }

    /// Whether any selected test belongs to an isolated category
    pub fn needs_isolation(&self, ids: &[TestId]) -> Result<bool, DiscoveryError> {
        let isolated: Vec<CategoryRule> = self
            .category_rules()?
            .into_iter()
            .filter(|rule| rule.isolated)
            .collect();

        Ok(ids
            .iter()
            .any(|id| isolated.iter().any(|rule| rule.matches(id))))
    }
}

/// Read identifiers from an allow-list manifest
pub fn read_manifest(path: &Path) -> Result<Vec<String>, DiscoveryError> {
    let content = std::fs::read_to_string(path).map_err(|source| DiscoveryError::Manifest {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(parse_manifest(&content))
}

/// Parse manifest lines, skipping blanks and `#` comments
pub fn parse_manifest(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}

/// Tests that get a single attempt regardless of the retry budget
#[derive(Clone, Debug, Default)]
pub struct SkipRetryList {
    entries: Vec<String>,
}

impl SkipRetryList {
    pub fn new(entries: Vec<String>) -> Self {
        let entries = entries
            .iter()
            .map(|e| TestId::new(e).as_str().to_string())
            .filter(|e| !e.is_empty())
            .collect();
        Self { entries }
    }

    pub fn load(path: &Path) -> Result<Self, DiscoveryError> {
        read_manifest(path).map(Self::new)
    }

    /// Exact or substring match against any entry
    pub fn matches(&self, id: &TestId) -> bool {
        self.entries
            .iter()
            .any(|entry| id.as_str() == entry || id.as_str().contains(entry.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
