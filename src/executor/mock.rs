//! Scripted executor and recovery for engine tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{AbortSignal, AttemptSuccess, Execute, ExecutionFailure, Recover, RecoveryFailure};
use crate::models::{AttemptMeta, CapturedOutput, ExitKind, StreamTag, TestId};

/// Per-test attempt results; unscripted tests pass, exhausted scripts repeat
/// their last entry.
#[derive(Default)]
pub struct MockExecutor {
    script: HashMap<String, Vec<bool>>,
    delays: HashMap<String, Duration>,
    default_delay: Duration,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub intervals: Mutex<Vec<(TestId, Instant, Instant)>>,
    pub calls: Mutex<Vec<(TestId, AttemptMeta)>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, id: &str, outcomes: &[bool]) -> Self {
        self.script.insert(id.to_string(), outcomes.to_vec());
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn delay_for(mut self, id: &str, delay: Duration) -> Self {
        self.delays.insert(id.to_string(), delay);
        self
    }

    pub fn attempts_of(&self, id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t.as_str() == id)
            .count()
    }

    fn outcome(&self, id: &TestId, index: u32) -> bool {
        match self.script.get(id.as_str()) {
            Some(outcomes) if !outcomes.is_empty() => {
                let i = (index as usize).min(outcomes.len() - 1);
                outcomes[i]
            }
            _ => true,
        }
    }
}

impl Execute for MockExecutor {
    async fn execute(
        &self,
        id: &TestId,
        meta: AttemptMeta,
        abort: &AbortSignal,
    ) -> Result<AttemptSuccess, ExecutionFailure> {
        self.calls.lock().unwrap().push((id.clone(), meta));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let start = Instant::now();
        let delay = self.delays.get(id.as_str()).copied().unwrap_or(self.default_delay);
        let aborted = tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            _ = abort.aborted() => true,
        };
        let end = Instant::now();

        self.intervals.lock().unwrap().push((id.clone(), start, end));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut output = CapturedOutput::new();
        output.push(StreamTag::Stdout, format!("attempt {}\n", meta.index));

        if aborted {
            return Err(ExecutionFailure::new(ExitKind::Aborted, output, end - start));
        }
        if self.outcome(id, meta.index) {
            Ok(AttemptSuccess {
                elapsed: end - start,
                output,
            })
        } else {
            Err(ExecutionFailure::new(ExitKind::Code(1), output, end - start))
        }
    }
}

#[derive(Default)]
pub struct MockRecovery {
    pub recovered: Mutex<Vec<TestId>>,
    pub fail: bool,
}

impl Recover for MockRecovery {
    async fn recover(&self, id: &TestId) -> Result<(), RecoveryFailure> {
        self.recovered.lock().unwrap().push(id.clone());
        if self.fail {
            return Err(RecoveryFailure {
                dir: id.parent_dir(),
                message: "scripted failure".to_string(),
            });
        }
        Ok(())
    }
}
