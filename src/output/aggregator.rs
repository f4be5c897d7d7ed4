//! Output aggregation
//!
//! Workers never write captured output directly. Each flush takes the single
//! print permit and emits one delimited block, so blocks from concurrent tests
//! never interleave.

use std::io::{self, Write};
use tokio::sync::Mutex;

use crate::models::{CapturedOutput, TestId};

const RULE: &str = "────────────────────────────────────────";

/// Serializes block output from concurrent workers
pub struct OutputAggregator {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl OutputAggregator {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    /// Emit one block: start marker, chunks in capture order, end marker
    pub async fn emit_block(
        &self,
        test: &TestId,
        heading: &str,
        output: &CapturedOutput,
    ) -> io::Result<()> {
        let block = render_block(test, heading, output);

        let mut writer = self.writer.lock().await;
        writer.write_all(&block)?;
        writer.flush()
    }

    /// Emit a single line under the print permit
    pub async fn emit_line(&self, line: &str) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writeln!(writer, "{line}")?;
        writer.flush()
    }
}

fn render_block(test: &TestId, heading: &str, output: &CapturedOutput) -> Vec<u8> {
    let mut block = Vec::new();
    block.extend_from_slice(format!("┌{RULE}\n│ {heading}: {test}\n├{RULE}\n").as_bytes());

    for chunk in output.chunks() {
        block.extend_from_slice(&chunk.data);
    }
    if output.is_empty() {
        block.extend_from_slice(b"(no output)\n");
    } else if block.last() != Some(&b'\n') {
        block.push(b'\n');
    }

    block.extend_from_slice(format!("└{RULE} end {test}\n").as_bytes());
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StreamTag;
    use std::sync::{Arc, Mutex as StdMutex};

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<StdMutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            // One byte at a time to expose any interleaving.
            let mut inner = self.0.lock().unwrap();
            if let Some(b) = buf.first() {
                inner.push(*b);
                Ok(1)
            } else {
                Ok(0)
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[tokio::test]
    async fn test_block_layout() {
        let buffer = SharedBuffer::default();
        let aggregator = OutputAggregator::new(Box::new(buffer.clone()));

        let mut output = CapturedOutput::new();
        output.push(StreamTag::Stdout, "one\n");
        output.push(StreamTag::Stderr, "two");

        aggregator
            .emit_block(&TestId::new("a/x.test.js"), "FAIL", &output)
            .await
            .unwrap();

        let text = buffer.text();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[1].contains("FAIL: a/x.test.js"));
        assert_eq!(lines[3], "one");
        assert_eq!(lines[4], "two");
        assert!(lines[5].ends_with("end a/x.test.js"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_blocks_never_interleave() {
        let buffer = SharedBuffer::default();
        let aggregator = Arc::new(OutputAggregator::new(Box::new(buffer.clone())));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let aggregator = aggregator.clone();
                tokio::spawn(async move {
                    let id = TestId::new(format!("t{i}.test.js"));
                    let mut output = CapturedOutput::new();
                    for line in 0..20 {
                        output.push(StreamTag::Stdout, format!("t{i} line {line}\n"));
                    }
                    aggregator.emit_block(&id, "FAIL", &output).await.unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        // Every body line between a block's markers belongs to that block's test.
        let text = buffer.text();
        let mut current: Option<String> = None;
        let mut blocks = 0;
        for line in text.lines() {
            if let Some(rest) = line.strip_prefix("│ FAIL: ") {
                current = Some(rest.trim_end_matches(".test.js").to_string());
            } else if line.contains(" end ") {
                current = None;
                blocks += 1;
            } else if let Some(owner) = &current {
                if !line.starts_with('├') {
                    assert!(line.starts_with(&format!("{owner} ")), "stray line {line:?}");
                }
            }
        }
        assert_eq!(blocks, 16);
    }
}
