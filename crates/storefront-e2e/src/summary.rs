//! Suite-level outcome collection and JUnit XML output.

use crate::reporter::escape_markup;
use crate::result::HarnessResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Outcome of one test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestStatus {
    /// Body and hooks succeeded
    Passed,
    /// A hook or the body failed
    Failed,
    /// Declared but not run
    Skipped,
}

impl TestStatus {
    /// Check if status is passing
    #[must_use]
    pub const fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }

    /// Check if status is failing
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

/// Result of one test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    /// Test title
    pub title: String,
    /// Status
    pub status: TestStatus,
    /// Wall time including hooks and report generation
    pub duration: Duration,
    /// First failure message
    pub error: Option<String>,
    /// `report.json` written for this test, if any
    pub report_path: Option<PathBuf>,
}

impl TestOutcome {
    /// Create a passing outcome
    #[must_use]
    pub fn passed(title: impl Into<String>, duration: Duration) -> Self {
        Self {
            title: title.into(),
            status: TestStatus::Passed,
            duration,
            error: None,
            report_path: None,
        }
    }

    /// Create a failing outcome
    #[must_use]
    pub fn failed(title: impl Into<String>, duration: Duration, error: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            status: TestStatus::Failed,
            duration,
            error: Some(error.into()),
            report_path: None,
        }
    }

    /// Create a skipped outcome
    #[must_use]
    pub fn skipped(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            status: TestStatus::Skipped,
            duration: Duration::ZERO,
            error: None,
            report_path: None,
        }
    }

    /// Attach the report location
    #[must_use]
    pub fn with_report(mut self, path: Option<PathBuf>) -> Self {
        self.report_path = path;
        self
    }
}

/// All outcomes of one [`TestRunner::run`](crate::TestRunner::run)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuiteSummary {
    /// Suite name
    pub suite_name: String,
    /// Outcomes in declaration order
    pub outcomes: Vec<TestOutcome>,
    /// Suite wall time
    pub duration: Duration,
    /// Suite-level failures (global teardown)
    pub errors: Vec<String>,
}

impl SuiteSummary {
    /// Create a summary
    #[must_use]
    pub fn new(suite_name: impl Into<String>, outcomes: Vec<TestOutcome>, duration: Duration) -> Self {
        Self {
            suite_name: suite_name.into(),
            outcomes,
            duration,
            errors: Vec::new(),
        }
    }

    /// Get passed test count
    #[must_use]
    pub fn passed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status.is_passed()).count()
    }

    /// Get failed test count
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status.is_failed()).count()
    }

    /// Get skipped test count
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == TestStatus::Skipped)
            .count()
    }

    /// Get total test count
    #[must_use]
    pub fn total_count(&self) -> usize {
        self.outcomes.len()
    }

    /// Passed over total, 1.0 for an empty suite
    #[must_use]
    pub fn pass_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 1.0;
        }
        self.passed_count() as f64 / self.total_count() as f64
    }

    /// No failed test and no suite-level error
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failed_count() == 0 && self.errors.is_empty()
    }

    /// Failed outcomes
    #[must_use]
    pub fn failures(&self) -> Vec<&TestOutcome> {
        self.outcomes.iter().filter(|o| o.status.is_failed()).collect()
    }

    /// One-line summary
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{}: {}/{} passed ({:.1}%)",
            self.suite_name,
            self.passed_count(),
            self.total_count(),
            self.pass_rate() * 100.0
        )
    }

    /// Write JUnit XML for CI
    pub fn write_junit(&self, output_path: &Path) -> HarnessResult<()> {
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(output_path, self.render_junit())?;
        Ok(())
    }

    /// Render JUnit XML content
    #[must_use]
    pub fn render_junit(&self) -> String {
        let mut xml = String::new();

        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        xml.push('\n');
        xml.push_str(&format!(
            r#"<testsuite name="{}" tests="{}" failures="{}" skipped="{}" errors="{}" time="{:.3}">"#,
            escape_markup(&self.suite_name),
            self.total_count(),
            self.failed_count(),
            self.skipped_count(),
            self.errors.len(),
            self.duration.as_secs_f64()
        ));
        xml.push('\n');

        for outcome in &self.outcomes {
            xml.push_str(&format!(
                r#"  <testcase name="{}" time="{:.3}">"#,
                escape_markup(&outcome.title),
                outcome.duration.as_secs_f64()
            ));
            xml.push('\n');

            match (&outcome.status, &outcome.error) {
                (TestStatus::Failed, error) => {
                    let message = escape_markup(error.as_deref().unwrap_or("failed"));
                    xml.push_str(&format!(
                        r#"    <failure message="{message}">{message}</failure>"#
                    ));
                    xml.push('\n');
                }
                (TestStatus::Skipped, _) => xml.push_str("    <skipped/>\n"),
                (TestStatus::Passed, _) => {}
            }

            if let Some(report) = &outcome.report_path {
                xml.push_str(&format!(
                    "    <system-out>{}</system-out>\n",
                    escape_markup(&report.display().to_string())
                ));
            }

            xml.push_str("  </testcase>\n");
        }

        for error in &self.errors {
            xml.push_str(&format!(
                "  <system-err>{}</system-err>\n",
                escape_markup(error)
            ));
        }

        xml.push_str("</testsuite>\n");
        xml
    }
}
