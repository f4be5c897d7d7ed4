//! Output formatters for run results
//!
//! Provides table and JSON renderings of a run summary.

use clap::ValueEnum;

use crate::models::{RunSummary, TestReport, TestStatus};

/// Output format options
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    JsonPretty,
}

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    /// Format the final run summary
    pub fn format_summary(&self, summary: &RunSummary) -> String {
        match self.format {
            OutputFormat::Table => self.format_summary_table(summary),
            OutputFormat::Json => serde_json::to_string(summary).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(summary).unwrap_or_default(),
        }
    }

    fn status_label(&self, status: TestStatus) -> &'static str {
        if self.colorize {
            match status {
                TestStatus::Passed => "\x1b[32m✓ PASS\x1b[0m",
                TestStatus::Failed => "\x1b[31m✗ FAIL\x1b[0m",
                TestStatus::Abandoned => "\x1b[33m○ ABANDONED\x1b[0m",
            }
        } else {
            match status {
                TestStatus::Passed => "✓ PASS",
                TestStatus::Failed => "✗ FAIL",
                TestStatus::Abandoned => "○ ABANDONED",
            }
        }
    }

    fn format_report_row(&self, report: &TestReport) -> String {
        let retried = if report.attempts > 1 {
            format!(" (attempts: {})", report.attempts)
        } else {
            String::new()
        };

        format!(
            "  {} {} [{:>6}ms]{}",
            self.status_label(report.status),
            report.id,
            report.duration_ms,
            retried
        )
    }

    fn format_summary_table(&self, summary: &RunSummary) -> String {
        let mut out = String::new();

        out.push_str(&format!(
            "\nGroup {}/{} - run {}\n",
            summary.group_pos, summary.group_total, summary.run_id
        ));
        out.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");

        // Passing tests stay quiet unless they needed retries.
        for report in &summary.reports {
            if report.status != TestStatus::Passed || report.attempts > 1 {
                out.push_str(&self.format_report_row(report));
                out.push('\n');
            }
        }

        out.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
        out.push_str(&format!(
            "Total: {} | Pass: {} | Fail: {} | Abandoned: {} | Duration: {}ms\n",
            summary.total,
            summary.passed,
            summary.failed,
            summary.abandoned,
            summary.duration_ms()
        ));

        let failures: Vec<&TestReport> = summary.failures().collect();
        if !failures.is_empty() {
            out.push_str("\nFailed tests:\n");
            for report in failures {
                let exit = report
                    .last_exit
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_default();
                out.push_str(&format!("  - {} ({})\n", report.id, exit));
            }
        }

        if summary.aborted {
            out.push_str("\nRun aborted after an unrecovered failure.\n");
        }

        out
    }
}
