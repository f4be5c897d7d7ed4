//! Data models for test orchestration
//!
//! This module contains the data structures shared by every stage of a run.

mod attempt;
mod report;
mod test_spec;

pub use attempt::{
    AttemptMeta, AttemptOutcome, CapturedOutput, ExecutionAttempt, ExitKind, OutputChunk,
    StreamTag,
};
pub use report::{RunSummary, TestReport, TestStatus};
pub use test_spec::{TestId, TestSpec};
