//! Filesystem recovery between attempts
//!
//! A failed attempt may leave generated files or modified fixtures behind.
//! Before a retry the containing directory is restored from version control.

use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

use super::{Recover, RecoveryFailure};
use crate::models::TestId;

/// Directory to restore for `id`.
///
/// Tests living directly inside a fixture directory restore its parent, which
/// holds the fixture and the test together.
pub fn recovery_dir(id: &TestId, fixture_dir_names: &[String]) -> PathBuf {
    let dir = id.parent_dir();

    let in_fixture = dir
        .file_name()
        .map(|name| fixture_dir_names.iter().any(|f| name == f.as_str()))
        .unwrap_or(false);

    if in_fixture {
        dir.parent().map(Path::to_path_buf).unwrap_or_default()
    } else {
        dir
    }
}

/// `git clean` + `git checkout` recovery
#[derive(Clone, Debug)]
pub struct GitRecovery {
    root: PathBuf,
    fixture_dir_names: Vec<String>,
}

impl GitRecovery {
    pub fn new(root: impl Into<PathBuf>, fixture_dir_names: Vec<String>) -> Self {
        Self {
            root: root.into(),
            fixture_dir_names,
        }
    }

    async fn git(&self, args: &[&str], dir: &Path) -> Result<(), RecoveryFailure> {
        let output = Command::new("git")
            .args(args)
            .arg("--")
            .arg(dir)
            .current_dir(&self.root)
            .output()
            .await
            .map_err(|e| RecoveryFailure {
                dir: dir.to_path_buf(),
                message: format!("failed to run git {}: {e}", args.join(" ")),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RecoveryFailure {
                dir: dir.to_path_buf(),
                message: format!("git {}: {}", args.join(" "), stderr.trim()),
            });
        }

        Ok(())
    }
}

impl Recover for GitRecovery {
    async fn recover(&self, id: &TestId) -> Result<(), RecoveryFailure> {
        let dir = recovery_dir(id, &self.fixture_dir_names);

        // Never wipe the whole checkout.
        if dir.as_os_str().is_empty() {
            return Err(RecoveryFailure {
                dir,
                message: "refusing to recover the repository root".to_string(),
            });
        }

        debug!("Recovering {} for {}", dir.display(), id);
        self.git(&["clean", "-fdx"], &dir).await?;
        self.git(&["checkout"], &dir).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixtures() -> Vec<String> {
        vec!["fixtures".to_string(), "__fixtures__".to_string()]
    }

    #[test]
    fn test_recovery_dir() {
        assert_eq!(
            recovery_dir(&TestId::new("test/unit/a.test.js"), &fixtures()),
            PathBuf::from("test/unit")
        );
        assert_eq!(
            recovery_dir(&TestId::new("test/unit/fixtures/a.test.js"), &fixtures()),
            PathBuf::from("test/unit")
        );
        assert_eq!(
            recovery_dir(&TestId::new("a.test.js"), &fixtures()),
            PathBuf::new()
        );
    }

    #[tokio::test]
    async fn test_refuses_root() {
        let recovery = GitRecovery::new("/nonexistent", fixtures());
        let err = recovery.recover(&TestId::new("a.test.js")).await.unwrap_err();
        assert!(err.message.contains("repository root"));
    }

    #[tokio::test]
    async fn test_restores_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let git = |args: &[&str]| {
            std::process::Command::new("git")
                .args(args)
                .current_dir(root)
                .output()
        };

        // Skip quietly where git is unavailable.
        if git(&["init", "-q"]).map(|o| !o.status.success()).unwrap_or(true) {
            return;
        }
        std::fs::create_dir_all(root.join("suite")).unwrap();
        std::fs::write(root.join("suite/a.test.js"), "original").unwrap();
        git(&["add", "."]).unwrap();
        let committed = git(&[
            "-c",
            "user.name=t",
            "-c",
            "user.email=t@t",
            "commit",
            "-q",
            "-m",
            "init",
        ])
        .unwrap();
        assert!(committed.status.success());

        std::fs::write(root.join("suite/a.test.js"), "modified").unwrap();
        std::fs::write(root.join("suite/leftover.tmp"), "junk").unwrap();

        GitRecovery::new(root, fixtures())
            .recover(&TestId::new("suite/a.test.js"))
            .await
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(root.join("suite/a.test.js")).unwrap(),
            "original"
        );
        assert!(!root.join("suite/leftover.tmp").exists());
    }
}
