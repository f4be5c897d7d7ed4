//! Provisioning for isolated categories
//!
//! Some categories test an installed copy of the software rather than the
//! working tree. A configured setup command produces the installation once per
//! run; the returned guard tears it down at the end.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::ProvisionConfig;

/// Provisioning errors
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("no provisioning setup command is configured")]
    NotConfigured,

    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("setup printed an invalid installation description: {0}")]
    Decode(#[from] serde_json::Error),
}

/// An installation produced by the setup command
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installation {
    pub install_dir: PathBuf,
    #[serde(default)]
    pub package_paths: BTreeMap<String, String>,
}

impl Installation {
    /// Variables exported to every test subprocess
    pub fn env_vars(&self) -> BTreeMap<String, String> {
        let packages = serde_json::to_string(&self.package_paths).unwrap_or_else(|_| "{}".into());
        BTreeMap::from([
            (
                "TESTSHARD_INSTALL_DIR".to_string(),
                self.install_dir.display().to_string(),
            ),
            ("TESTSHARD_PACKAGE_PATHS".to_string(), packages),
        ])
    }
}

/// Runs the configured setup and teardown commands
#[derive(Clone, Debug)]
pub struct CommandProvisioner {
    root: PathBuf,
    config: ProvisionConfig,
}

impl CommandProvisioner {
    pub fn new(root: impl Into<PathBuf>, config: ProvisionConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    /// Run setup and parse the installation it prints
    pub async fn setup(&self) -> Result<InstallGuard, ProvisionError> {
        info!("Provisioning installation: {}", self.config.setup.join(" "));
        let stdout = run_command(&self.config.setup, &self.root).await?;
        let installation: Installation = serde_json::from_slice(&stdout)?;

        info!(
            "Installation ready at {} ({} packages)",
            installation.install_dir.display(),
            installation.package_paths.len()
        );

        Ok(InstallGuard {
            installation,
            teardown: self.config.teardown.clone(),
            root: self.root.clone(),
            released: false,
        })
    }
}

/// Owns a provisioned installation until the run ends.
///
/// Call [`InstallGuard::teardown`] on every exit path; dropping the guard
/// without it still removes the install directory.
#[derive(Debug)]
pub struct InstallGuard {
    installation: Installation,
    teardown: Vec<String>,
    root: PathBuf,
    released: bool,
}

impl InstallGuard {
    pub fn installation(&self) -> &Installation {
        &self.installation
    }

    pub fn env_vars(&self) -> BTreeMap<String, String> {
        self.installation.env_vars()
    }

    /// Run the teardown command, then remove the install directory
    pub async fn teardown(mut self) {
        self.released = true;

        if !self.teardown.is_empty() {
            if let Err(e) = run_command(&self.teardown, &self.root).await {
                warn!("Provisioning teardown failed: {}", e);
            }
        }

        let dir = &self.installation.install_dir;
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => debug!("Removed {}", dir.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove {}: {}", dir.display(), e),
        }
    }
}

impl Drop for InstallGuard {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_dir_all(&self.installation.install_dir);
        }
    }
}

async fn run_command(command: &[String], root: &Path) -> Result<Vec<u8>, ProvisionError> {
    let (program, args) = command.split_first().ok_or(ProvisionError::NotConfigured)?;
    let display = command.join(" ");

    let output = Command::new(program)
        .args(args)
        .current_dir(root)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| ProvisionError::Spawn {
            command: display.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(ProvisionError::Failed {
            command: display,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output.stdout)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sh(script: String) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script]
    }

    #[tokio::test]
    async fn test_setup_and_teardown() {
        let dir = tempdir().unwrap();
        let install = dir.path().join("install");
        let marker = dir.path().join("torn-down");

        let config = ProvisionConfig {
            setup: sh(format!(
                r#"mkdir -p {0} && echo '{{"install_dir": "{0}", "package_paths": {{"app": "{0}/app"}}}}'"#,
                install.display()
            )),
            teardown: sh(format!("touch {}", marker.display())),
        };

        let guard = CommandProvisioner::new(dir.path(), config)
            .setup()
            .await
            .unwrap();
        assert_eq!(guard.installation().install_dir, install);
        assert!(install.is_dir());

        let vars = guard.env_vars();
        assert_eq!(vars["TESTSHARD_INSTALL_DIR"], install.display().to_string());
        assert!(vars["TESTSHARD_PACKAGE_PATHS"].contains("\"app\""));

        guard.teardown().await;
        assert!(marker.exists());
        assert!(!install.exists());
    }

    #[tokio::test]
    async fn test_drop_removes_install_dir() {
        let dir = tempdir().unwrap();
        let install = dir.path().join("install");
        let config = ProvisionConfig {
            setup: sh(format!(
                r#"mkdir -p {0} && echo '{{"install_dir": "{0}"}}'"#,
                install.display()
            )),
            teardown: Vec::new(),
        };

        let guard = CommandProvisioner::new(dir.path(), config)
            .setup()
            .await
            .unwrap();
        assert!(install.is_dir());
        drop(guard);
        assert!(!install.exists());
    }

    #[tokio::test]
    async fn test_setup_errors() {
        let dir = tempdir().unwrap();

        let failing = ProvisionConfig {
            setup: sh("echo broken >&2; exit 2".to_string()),
            teardown: Vec::new(),
        };
        let err = CommandProvisioner::new(dir.path(), failing)
            .setup()
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Failed { ref stderr, .. } if stderr == "broken"));

        let garbage = ProvisionConfig {
            setup: sh("echo not-json".to_string()),
            teardown: Vec::new(),
        };
        let err = CommandProvisioner::new(dir.path(), garbage)
            .setup()
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Decode(_)));
    }
}
