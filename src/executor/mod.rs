//! Test execution engine
//!
//! Bounded concurrent execution of a group, with per-directory serialization
//! for legacy suites, retries with filesystem recovery, and run-wide abort.

mod abort;
#[cfg(test)]
mod mock;
mod permits;
mod process;
mod recovery;
mod retry;
mod scheduler;

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::models::{AttemptMeta, CapturedOutput, ExitKind, TestId};

pub use abort::AbortSignal;
pub use permits::ConcurrencyPermits;
pub use process::{EnvContract, ProcessExecutor};
pub use recovery::GitRecovery;
pub use retry::{RetryEngine, RetryOptions};
pub use scheduler::{Scheduler, SchedulerOutcome};

/// A passing attempt
#[derive(Debug)]
pub struct AttemptSuccess {
    pub elapsed: Duration,
    pub output: CapturedOutput,
}

/// A failing attempt; retried while budget remains
#[derive(Debug, Error)]
#[error("attempt failed: {exit}")]
pub struct ExecutionFailure {
    pub exit: ExitKind,
    pub output: CapturedOutput,
    pub duration: Duration,
}

impl ExecutionFailure {
    pub fn new(exit: ExitKind, output: CapturedOutput, duration: Duration) -> Self {
        Self {
            exit,
            output,
            duration,
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.exit == ExitKind::Aborted
    }
}

/// Restoring the tree between attempts failed; logged, never fatal
#[derive(Debug, Error)]
#[error("recovery of {} failed: {message}", dir.display())]
pub struct RecoveryFailure {
    pub dir: PathBuf,
    pub message: String,
}

/// A test exhausted its retries without continue-on-error
#[derive(Clone, Debug, Error)]
#[error("{test} failed after {attempts} attempt(s); run aborted")]
pub struct FatalSchedulerAbort {
    pub test: TestId,
    pub attempts: u32,
}

/// Runs one attempt of one test
pub trait Execute: Send + Sync {
    fn execute(
        &self,
        id: &TestId,
        meta: AttemptMeta,
        abort: &AbortSignal,
    ) -> impl Future<Output = Result<AttemptSuccess, ExecutionFailure>> + Send;
}

/// Restores the files a failed attempt may have touched
pub trait Recover: Send + Sync {
    fn recover(&self, id: &TestId) -> impl Future<Output = Result<(), RecoveryFailure>> + Send;
}
