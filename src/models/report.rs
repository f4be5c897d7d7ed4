//! Test reports and run summaries
//!
//! Defines the final per-test record and the summary of a whole run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{ExitKind, TestId};

/// Final status of a test
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    /// Never started, or killed, because the run was aborted
    Abandoned,
}

impl TestStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            TestStatus::Passed => "✓",
            TestStatus::Failed => "✗",
            TestStatus::Abandoned => "○",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TestStatus::Passed)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Passed => write!(f, "PASS"),
            TestStatus::Failed => write!(f, "FAIL"),
            TestStatus::Abandoned => write!(f, "ABANDONED"),
        }
    }
}

/// Final record of one test
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestReport {
    pub id: TestId,
    pub status: TestStatus,
    pub attempts: u32,
    pub recoveries: u32,
    /// Duration of the last finished attempt
    pub duration_ms: u64,
    pub last_exit: Option<ExitKind>,
}

impl TestReport {
    pub fn passed(id: TestId, attempts: u32, recoveries: u32, duration_ms: u64) -> Self {
        Self {
            id,
            status: TestStatus::Passed,
            attempts,
            recoveries,
            duration_ms,
            last_exit: None,
        }
    }

    pub fn failed(
        id: TestId,
        attempts: u32,
        recoveries: u32,
        duration_ms: u64,
        exit: ExitKind,
    ) -> Self {
        Self {
            id,
            status: TestStatus::Failed,
            attempts,
            recoveries,
            duration_ms,
            last_exit: Some(exit),
        }
    }

    pub fn abandoned(id: TestId, attempts: u32, recoveries: u32) -> Self {
        Self {
            id,
            status: TestStatus::Abandoned,
            attempts,
            recoveries,
            duration_ms: 0,
            last_exit: None,
        }
    }
}

impl fmt::Display for TestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms, {} attempt(s)]",
            self.status.symbol(),
            self.id,
            self.duration_ms,
            self.attempts
        )?;
        if let Some(exit) = &self.last_exit {
            write!(f, " - {exit}")?;
        }
        Ok(())
    }
}

/// Summary of one sharded run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub group_pos: usize,
    pub group_total: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub abandoned: usize,
    /// Set when a test exhausted its retries without continue-on-error
    pub aborted: bool,
    pub reports: Vec<TestReport>,
}

impl RunSummary {
    pub fn new(
        group_pos: usize,
        group_total: usize,
        started_at: DateTime<Utc>,
        reports: Vec<TestReport>,
        aborted: bool,
    ) -> Self {
        let count = |status: TestStatus| reports.iter().filter(|r| r.status == status).count();
        let passed = count(TestStatus::Passed);
        let failed = count(TestStatus::Failed);
        let abandoned = count(TestStatus::Abandoned);

        Self {
            run_id: generate_run_id(),
            group_pos,
            group_total,
            started_at,
            finished_at: Utc::now(),
            total: reports.len(),
            passed,
            failed,
            abandoned,
            aborted,
            reports,
        }
    }

    pub fn is_all_passed(&self) -> bool {
        self.passed == self.total && !self.aborted
    }

    /// Tests that ultimately failed
    pub fn failures(&self) -> impl Iterator<Item = &TestReport> {
        self.reports
            .iter()
            .filter(|r| r.status == TestStatus::Failed)
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    pub fn exit_code(&self) -> u8 {
        if self.is_all_passed() {
            0
        } else {
            1
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Group {}/{}", self.group_pos, self.group_total)?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        for report in &self.reports {
            writeln!(f, "  {report}")?;
        }
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Abandoned: {}",
            self.total, self.passed, self.failed, self.abandoned
        )
    }
}

/// Generate unique run ID
fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let random: u32 = rand::random::<u32>() % 10000;
    format!("{timestamp}_{random:04}")
}
