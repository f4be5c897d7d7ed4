//! Concurrency scheduler
//!
//! Every test of the group becomes an independent task; the permit pools held
//! by the retry engine bound how many run at once.

use futures::future::join_all;
use std::sync::Arc;
use tracing::{error, info};

use super::{Execute, FatalSchedulerAbort, Recover, RetryEngine};
use crate::models::{ExitKind, TestReport, TestSpec};
use crate::utils::Timer;

/// Reports in dispatch order, plus the abort reason if the run was cut short
#[derive(Debug)]
pub struct SchedulerOutcome {
    pub reports: Vec<TestReport>,
    pub abort: Option<FatalSchedulerAbort>,
}

/// Dispatches a group onto the retry engine
pub struct Scheduler<E, R> {
    engine: Arc<RetryEngine<E, R>>,
}

impl<E, R> Scheduler<E, R>
where
    E: Execute + 'static,
    R: Recover + 'static,
{
    pub fn new(engine: RetryEngine<E, R>) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }

    pub fn engine(&self) -> &RetryEngine<E, R> {
        &self.engine
    }

    /// Run every spec to completion or abandonment
    pub async fn run(&self, specs: Vec<TestSpec>) -> SchedulerOutcome {
        info!("Dispatching {} tests", specs.len());
        let timer = Timer::start("scheduler");

        let ids: Vec<_> = specs.iter().map(|s| s.id.clone()).collect();
        let mut handles = Vec::with_capacity(specs.len());

        for spec in specs {
            let engine = self.engine.clone();
            let handle = tokio::spawn(async move { engine.run(&spec).await });
            handles.push(handle);
        }

        let reports: Vec<TestReport> = join_all(handles)
            .await
            .into_iter()
            .zip(ids)
            .map(|(result, id)| {
                result.unwrap_or_else(|e| {
                    error!("Worker for {} panicked: {}", id, e);
                    TestReport::failed(id, 0, 0, 0, ExitKind::SpawnFailed(e.to_string()))
                })
            })
            .collect();

        info!(
            "Scheduler finished {} tests in {}ms",
            reports.len(),
            timer.elapsed_ms()
        );

        SchedulerOutcome {
            reports,
            abort: self.engine.fatal_abort(),
        }
    }
}
