//! Execution attempts and captured output

#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::TestId;

/// Which stream a captured chunk came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamTag {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamTag::Stdout => write!(f, "stdout"),
            StreamTag::Stderr => write!(f, "stderr"),
        }
    }
}

/// One captured piece of subprocess output
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputChunk {
    pub tag: StreamTag,
    pub data: Vec<u8>,
}

/// Output of one attempt, in capture order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    chunks: Vec<OutputChunk>,
}

impl CapturedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tag: StreamTag, data: impl Into<Vec<u8>>) {
        let data = data.into();
        if !data.is_empty() {
            self.chunks.push(OutputChunk { tag, data });
        }
    }

    pub fn chunks(&self) -> &[OutputChunk] {
        &self.chunks
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Concatenated bytes of one stream
    pub fn stream(&self, tag: StreamTag) -> Vec<u8> {
        self.chunks
            .iter()
            .filter(|c| c.tag == tag)
            .flat_map(|c| c.data.iter().copied())
            .collect()
    }
}

/// How a failed attempt ended
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum ExitKind {
    Code(i32),
    Signal(i32),
    SpawnFailed(String),
    /// Killed because the run was aborted
    Aborted,
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitKind::Code(code) => write!(f, "exit code {code}"),
            ExitKind::Signal(sig) => write!(f, "signal {sig}"),
            ExitKind::SpawnFailed(msg) => write!(f, "failed to spawn: {msg}"),
            ExitKind::Aborted => write!(f, "aborted"),
        }
    }
}

/// Attempt lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Pending,
    Passed,
    Failed,
}

/// Per-attempt metadata handed to the executor
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttemptMeta {
    /// 0-based attempt index
    pub index: u32,
    pub is_final: bool,
}

impl AttemptMeta {
    pub fn new(index: u32, max_attempts: u32) -> Self {
        Self {
            index,
            is_final: index + 1 >= max_attempts,
        }
    }

    pub fn is_retry(&self) -> bool {
        self.index > 0
    }
}

/// One try at running a test, owned by the worker running it
#[derive(Debug)]
pub struct ExecutionAttempt {
    pub test: TestId,
    pub meta: AttemptMeta,
    pub outcome: AttemptOutcome,
    pub duration: Duration,
    pub output: CapturedOutput,
    pub exit: Option<ExitKind>,
}

impl ExecutionAttempt {
    pub fn new(test: TestId, meta: AttemptMeta) -> Self {
        Self {
            test,
            meta,
            outcome: AttemptOutcome::Pending,
            duration: Duration::ZERO,
            output: CapturedOutput::new(),
            exit: None,
        }
    }

    pub fn passed(&mut self, duration: Duration) {
        self.outcome = AttemptOutcome::Passed;
        self.duration = duration;
    }

    pub fn failed(&mut self, duration: Duration, output: CapturedOutput, exit: ExitKind) {
        self.outcome = AttemptOutcome::Failed;
        self.duration = duration;
        self.output = output;
        self.exit = Some(exit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_captured_output_order() {
        let mut out = CapturedOutput::new();
        out.push(StreamTag::Stdout, "a");
        out.push(StreamTag::Stderr, "b");
        out.push(StreamTag::Stdout, "");
        out.push(StreamTag::Stdout, "c");

        assert_eq!(out.chunks().len(), 3);
        assert_eq!(out.stream(StreamTag::Stdout), b"ac");
        assert_eq!(out.chunks()[1].tag, StreamTag::Stderr);
    }

    #[test]
    fn test_attempt_meta() {
        let first = AttemptMeta::new(0, 3);
        assert!(!first.is_retry());
        assert!(!first.is_final);

        let last = AttemptMeta::new(2, 3);
        assert!(last.is_retry());
        assert!(last.is_final);

        assert!(AttemptMeta::new(0, 1).is_final);
    }

    #[test]
    fn test_exit_kind_display() {
        assert_eq!(ExitKind::Code(2).to_string(), "exit code 2");
        assert_eq!(ExitKind::Aborted.to_string(), "aborted");
    }
}
