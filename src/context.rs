//! Run context
//!
//! Everything a run shares, built once per process and torn down once.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::config::AppConfig;
use crate::executor::{
    AbortSignal, ConcurrencyPermits, EnvContract, GitRecovery, ProcessExecutor, RetryEngine,
    RetryOptions, Scheduler,
};
use crate::output::OutputAggregator;
use crate::provision::{CommandProvisioner, InstallGuard, ProvisionError};
use crate::timings::TimingRecorder;

/// Shared state of one run
pub struct RunContext {
    root: PathBuf,
    config: AppConfig,
    abort: AbortSignal,
    aggregator: Arc<OutputAggregator>,
    recorder: Arc<TimingRecorder>,
    install: Option<InstallGuard>,
}

impl RunContext {
    pub fn new(root: impl Into<PathBuf>, config: AppConfig) -> Self {
        Self::with_aggregator(root, config, OutputAggregator::stdout())
    }

    pub fn with_aggregator(
        root: impl Into<PathBuf>,
        config: AppConfig,
        aggregator: OutputAggregator,
    ) -> Self {
        Self {
            root: root.into(),
            config,
            abort: AbortSignal::new(),
            aggregator: Arc::new(aggregator),
            recorder: Arc::new(TimingRecorder::new()),
            install: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn abort(&self) -> &AbortSignal {
        &self.abort
    }

    pub fn recorder(&self) -> &TimingRecorder {
        &self.recorder
    }

    pub fn installation(&self) -> Option<&InstallGuard> {
        self.install.as_ref()
    }

    /// Provision the installation isolated categories test against
    pub async fn provision(&mut self) -> Result<(), ProvisionError> {
        if self.install.is_some() {
            return Ok(());
        }
        if !self.config.provision.is_configured() {
            return Err(ProvisionError::NotConfigured);
        }

        let provisioner = CommandProvisioner::new(&self.root, self.config.provision.clone());
        self.install = Some(provisioner.setup().await?);
        Ok(())
    }

    /// Environment every test subprocess receives
    pub fn env_contract(&self) -> EnvContract {
        let contract = EnvContract::from_settings(&self.config.env);
        match &self.install {
            Some(install) => contract.with_extra(install.env_vars()),
            None => contract,
        }
    }

    /// Scheduler running real subprocesses with git recovery
    pub fn scheduler(&self, options: RetryOptions) -> Scheduler<ProcessExecutor, GitRecovery> {
        let executor = ProcessExecutor::new(&self.root, &self.config, self.env_contract())
            .verbose(options.verbose);
        let recovery = GitRecovery::new(&self.root, self.config.fixture_dir_names.clone());
        let permits = ConcurrencyPermits::new(self.config.concurrency, &self.config.legacy_roots);

        Scheduler::new(
            RetryEngine::new(
                executor,
                recovery,
                permits,
                self.aggregator.clone(),
                self.recorder.clone(),
                self.abort.clone(),
            )
            .with_options(options),
        )
    }

    /// Release run resources; called once on every exit path
    pub async fn teardown(mut self) {
        if let Some(install) = self.install.take() {
            info!("Tearing down provisioned installation");
            install.teardown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_provision_requires_setup() {
        let mut ctx = RunContext::new(".", AppConfig::default());
        let err = ctx.provision().await.unwrap_err();
        assert!(matches!(err, ProvisionError::NotConfigured));
        assert!(ctx.installation().is_none());
        ctx.teardown().await;
    }

    #[test]
    fn test_env_contract_without_installation() {
        let ctx = RunContext::new(".", AppConfig::default());
        let vars = ctx.env_contract().vars_for(
            &crate::models::TestId::new("a.test.js"),
            crate::models::AttemptMeta::new(0, 1),
            Path::new("/r.json"),
        );
        assert!(!vars.contains_key("TESTSHARD_INSTALL_DIR"));
        assert_eq!(vars["TESTSHARD_TEST_ID"], "a.test.js");
    }
}
