//! Test identifiers and specifications
//!
//! A test identifier is the normalized relative path of one test file.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Separator that introduces a suite marker after the file path
const SUITE_MARKER: &str = "::";

/// Normalized relative path naming one test
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestId(String);

impl TestId {
    /// Normalize a raw identifier.
    ///
    /// Backslashes become `/`, a leading `./` is removed, and any trailing
    /// suite marker (`path::suite name`) or trailing slash is stripped.
    pub fn new(raw: impl AsRef<str>) -> Self {
        let mut id = raw.as_ref().trim().replace('\\', "/");

        if let Some(pos) = id.find(SUITE_MARKER) {
            id.truncate(pos);
        }

        let mut trimmed = id.as_str();
        while let Some(rest) = trimmed.strip_prefix("./") {
            trimmed = rest;
        }
        let trimmed = trimmed.trim_end_matches('/');

        Self(trimmed.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Path of the test file relative to the run root
    pub fn to_path(&self) -> PathBuf {
        PathBuf::from(&self.0)
    }

    /// Absolute path of the test file under `root`
    pub fn resolve(&self, root: &Path) -> PathBuf {
        root.join(&self.0)
    }

    /// Parent directory of the test, relative to the root
    pub fn parent_dir(&self) -> PathBuf {
        self.to_path()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    /// File-name safe form of the identifier, used for report and trace names.
    ///
    /// `/` becomes `_`; any other byte outside `[A-Za-z0-9.-]`, including `_`
    /// itself, is percent-encoded, so distinct identifiers never share a name.
    pub fn sanitized(&self) -> String {
        let mut out = String::with_capacity(self.0.len());
        for byte in self.0.bytes() {
            match byte {
                b'/' => out.push('_'),
                b if b.is_ascii_alphanumeric() || b == b'.' || b == b'-' => out.push(b as char),
                b => out.push_str(&format!("%{b:02X}")),
            }
        }
        out
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TestId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A test scheduled for execution
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestSpec {
    pub id: TestId,
    /// Group index (1-based) fixed before execution
    pub group: usize,
    /// Historical duration in seconds
    pub estimate_secs: Option<f64>,
    pub retry_budget: u32,
    pub skip_retry: bool,
}

impl TestSpec {
    pub fn new(id: TestId, group: usize) -> Self {
        Self {
            id,
            group,
            estimate_secs: None,
            retry_budget: 0,
            skip_retry: false,
        }
    }

    pub fn with_estimate(mut self, secs: Option<f64>) -> Self {
        self.estimate_secs = secs;
        self
    }

    pub fn with_retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget = budget;
        self
    }

    pub fn with_skip_retry(mut self, skip: bool) -> Self {
        self.skip_retry = skip;
        self
    }

    /// Total attempts allowed, honoring the skip-retry flag
    pub fn max_attempts(&self) -> u32 {
        if self.skip_retry {
            1
        } else {
            self.retry_budget.saturating_add(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_normalization() {
        assert_eq!(TestId::new("a\\b\\x.test.js").as_str(), "a/b/x.test.js");
        assert_eq!(TestId::new("./a/x.test.js").as_str(), "a/x.test.js");
        assert_eq!(TestId::new("a/x.test.js::renders list").as_str(), "a/x.test.js");
        assert_eq!(TestId::new("  a/dir/  ").as_str(), "a/dir");
    }

    #[test]
    fn test_id_parent_dir() {
        assert_eq!(TestId::new("a/b/x.test.js").parent_dir(), PathBuf::from("a/b"));
        assert_eq!(TestId::new("x.test.js").parent_dir(), PathBuf::new());
    }

    #[test]
    fn test_id_sanitized() {
        assert_eq!(TestId::new("a/x.test.js").sanitized(), "a_x.test.js");
        assert_eq!(TestId::new("a/b x.test.js").sanitized(), "a_b%20x.test.js");
        assert_eq!(TestId::new("a/b_c.test.js").sanitized(), "a_b%5Fc.test.js");
    }

    #[test]
    fn test_id_sanitized_is_distinct() {
        let ids = ["a/b_c.test.js", "a_b/c.test.js", "a/b/c.test.js", "a_b_c.test.js"];
        let names: std::collections::HashSet<_> =
            ids.iter().map(|id| TestId::new(*id).sanitized()).collect();
        assert_eq!(names.len(), ids.len());
    }

    #[test]
    fn test_spec_max_attempts() {
        let spec = TestSpec::new(TestId::new("a.test.js"), 1).with_retry_budget(2);
        assert_eq!(spec.max_attempts(), 3);
        assert_eq!(spec.with_skip_retry(true).max_attempts(), 1);
    }

    #[test]
    fn test_spec_max_attempts_saturates() {
        let spec = TestSpec::new(TestId::new("a.test.js"), 1).with_retry_budget(u32::MAX);
        assert_eq!(spec.max_attempts(), u32::MAX);
    }
}
