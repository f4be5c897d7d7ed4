//! Retry and recovery engine
//!
//! Drives one test through its attempts: acquire permits, execute, and on
//! failure flush the captured output, restore the tree, and try again until
//! the budget runs out.

use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{AbortSignal, ConcurrencyPermits, Execute, FatalSchedulerAbort, Recover};
use crate::models::{
    AttemptMeta, CapturedOutput, ExecutionAttempt, ExitKind, TestId, TestReport, TestSpec,
};
use crate::output::OutputAggregator;
use crate::timings::TimingRecorder;

/// Run-wide retry behavior
#[derive(Clone, Copy, Debug, Default)]
pub struct RetryOptions {
    /// Keep running other tests after one exhausts its retries
    pub continue_on_error: bool,
    /// Flush output of passing attempts too
    pub show_output: bool,
    /// Output is streamed live, so there is nothing buffered to flush
    pub verbose: bool,
}

/// Executes tests with retries, sharing permits and output across workers
pub struct RetryEngine<E, R> {
    executor: E,
    recovery: R,
    permits: ConcurrencyPermits,
    aggregator: Arc<OutputAggregator>,
    recorder: Arc<TimingRecorder>,
    abort: AbortSignal,
    options: RetryOptions,
    fatal: OnceLock<FatalSchedulerAbort>,
}

impl<E: Execute, R: Recover> RetryEngine<E, R> {
    pub fn new(
        executor: E,
        recovery: R,
        permits: ConcurrencyPermits,
        aggregator: Arc<OutputAggregator>,
        recorder: Arc<TimingRecorder>,
        abort: AbortSignal,
    ) -> Self {
        Self {
            executor,
            recovery,
            permits,
            aggregator,
            recorder,
            abort,
            options: RetryOptions::default(),
            fatal: OnceLock::new(),
        }
    }

    pub fn with_options(mut self, options: RetryOptions) -> Self {
        self.options = options;
        self
    }

    /// The first test that aborted the run, if any
    pub fn fatal_abort(&self) -> Option<FatalSchedulerAbort> {
        self.fatal.get().cloned()
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn recovery(&self) -> &R {
        &self.recovery
    }

    /// Run every attempt of `spec` and produce its final report
    pub async fn run(&self, spec: &TestSpec) -> TestReport {
        let id = &spec.id;
        let max_attempts = spec.max_attempts();
        let mut recoveries = 0;

        for index in 0..max_attempts {
            let Some(mut permit) = self.permits.acquire(id, &self.abort).await else {
                debug!("Abandoning {} before attempt {}", id, index);
                return TestReport::abandoned(id.clone(), index, recoveries);
            };
            // Abort may fire between the permit wait and dispatch.
            if self.abort.is_aborted() {
                return TestReport::abandoned(id.clone(), index, recoveries);
            }

            let meta = AttemptMeta::new(index, max_attempts);
            let mut attempt = ExecutionAttempt::new(id.clone(), meta);
            debug!("Running {} (attempt {}/{})", id, index + 1, max_attempts);

            match self.executor.execute(id, attempt.meta, &self.abort).await {
                Ok(success) => {
                    attempt.passed(success.elapsed);
                    self.recorder.record(id, success.elapsed).await;
                    if self.options.show_output && !self.options.verbose {
                        self.flush(id, "PASS", &success.output).await;
                    }
                    if attempt.meta.is_retry() {
                        info!("{} passed on attempt {}", id, index + 1);
                    }
                    return TestReport::passed(
                        id.clone(),
                        index + 1,
                        recoveries,
                        millis(attempt.duration),
                    );
                }
                Err(failure) if failure.is_aborted() => {
                    debug!("{} killed by abort", id);
                    return TestReport::abandoned(id.clone(), index + 1, recoveries);
                }
                Err(failure) => {
                    attempt.failed(failure.duration, failure.output, failure.exit);
                }
            }

            let heading = format!("FAIL (attempt {}/{})", index + 1, max_attempts);
            self.flush(id, &heading, &attempt.output).await;

            if attempt.meta.is_final {
                let exit = attempt.exit.take().unwrap_or(ExitKind::Code(1));
                error!("{} failed after {} attempt(s): {}", id, index + 1, exit);
                if !self.options.continue_on_error {
                    self.abort_run(id, index + 1);
                }
                return TestReport::failed(
                    id.clone(),
                    index + 1,
                    recoveries,
                    millis(attempt.duration),
                    exit,
                );
            }

            // Recovery keeps the directory slot but frees capacity for others.
            permit.release_global();
            if let Err(e) = self.recovery.recover(id).await {
                warn!("{}", e);
            }
            recoveries += 1;
            drop(permit);

            warn!("Retrying {} ({} of {} attempts used)", id, index + 1, max_attempts);
        }

        // max_attempts is never zero
        TestReport::abandoned(id.clone(), max_attempts, recoveries)
    }

    fn abort_run(&self, id: &TestId, attempts: u32) {
        let first = self
            .fatal
            .set(FatalSchedulerAbort {
                test: id.clone(),
                attempts,
            })
            .is_ok();
        if first {
            error!("Aborting run: {} exhausted its retries", id);
        }
        self.abort.trigger();
    }

    async fn flush(&self, id: &TestId, heading: &str, output: &CapturedOutput) {
        let result = if self.options.verbose {
            self.aggregator.emit_line(&format!("{heading}: {id}")).await
        } else {
            self.aggregator.emit_block(id, heading, output).await
        };
        if let Err(e) = result {
            warn!("Could not write output for {}: {}", id, e);
        }
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}
