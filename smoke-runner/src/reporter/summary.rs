// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{TestReport, TestStatus, UNFINISHED_RETURN_CODE};
use crate::helpers::plural;
use std::time::Duration;

/// Counts for one or more executions of a test group.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Summary {
    /// Tests that ran: passed, failed, errored or left unfinished.
    pub num_run: usize,

    /// Wall-clock time taken.
    pub time_taken: Duration,

    /// Tests that passed.
    pub num_succeeded: usize,

    /// Tests that never started.
    pub num_skipped: usize,

    /// Tests that failed or were left unfinished.
    pub num_failed: usize,

    /// Tests that hit an infrastructure error.
    pub num_errored: usize,
}

impl Summary {
    /// Adds up two summaries.
    pub fn combine(self, other: Self) -> Self {
        Self {
            num_run: self.num_run + other.num_run,
            time_taken: self.time_taken + other.time_taken,
            num_succeeded: self.num_succeeded + other.num_succeeded,
            num_skipped: self.num_skipped + other.num_skipped,
            num_failed: self.num_failed + other.num_failed,
            num_errored: self.num_errored + other.num_errored,
        }
    }

    /// Returns true if every test passed.
    pub fn all_passed(&self) -> bool {
        self.num_succeeded == self.num_run && self.num_skipped == 0
    }

    /// A one-line description of the counts.
    pub fn headline(&self) -> String {
        let secs = self.time_taken.as_secs_f64();
        if self.all_passed() {
            format!(
                "All {} {} passed in {secs:.2} seconds.",
                self.num_run,
                plural::tests_str(self.num_run),
            )
        } else {
            format!(
                "{} {} ran in {secs:.2} seconds ({} succeeded, {} {} skipped, {} failed, {} errored)",
                self.num_run,
                plural::tests_str(self.num_run),
                self.num_succeeded,
                self.num_skipped,
                plural::were_str(self.num_skipped),
                self.num_failed,
                self.num_errored,
            )
        }
    }
}

/// Summarizes one execution of a group of `num_tests` tests, appending lines to `lines`.
///
/// `report` must be combined, so unfinished tests show up as timeouts. They count as failures:
/// they started, so they weren't skipped, and they didn't finish, so they didn't pass.
pub(crate) fn summarize_execution(
    report: &TestReport,
    num_tests: usize,
    time_taken: Duration,
    lines: &mut Vec<String>,
) -> Summary {
    let num_succeeded = report.count(TestStatus::Pass);
    let num_errored = report.count(TestStatus::Error);
    let num_failed = report.count(TestStatus::Fail) + report.count(TestStatus::Timeout);
    let num_run = num_succeeded + num_errored + num_failed;
    let summary = Summary {
        num_run,
        time_taken,
        num_succeeded,
        num_skipped: num_tests.saturating_sub(num_run),
        num_failed,
        num_errored,
    };
    lines.push(summary.headline());

    if num_failed > 0 {
        lines.push("The following tests failed (with exit code):".to_owned());
        let failed = report
            .with_status(TestStatus::Fail)
            .chain(report.with_status(TestStatus::Timeout));
        for info in failed {
            lines.push(format!(
                "    {} ({})",
                info.test_file,
                info.return_code.unwrap_or(UNFINISHED_RETURN_CODE)
            ));
        }
    }
    if num_errored > 0 {
        lines.push("The following tests had errors:".to_owned());
        for info in report.with_status(TestStatus::Error) {
            lines.push(format!("    {}", info.test_file));
        }
    }
    summary
}

/// Summarizes several executions of the same group as a bulleted list.
pub(crate) fn summarize_repeated(
    executions: &[(TestReport, Duration)],
    num_tests: usize,
    total_time: Duration,
    lines: &mut Vec<String>,
) -> Summary {
    lines.push(format!(
        "Executed {} times in {:.2} seconds:",
        executions.len(),
        total_time.as_secs_f64()
    ));
    let mut combined = Summary::default();
    for (report, time_taken) in executions {
        let mut execution_lines = Vec::new();
        let summary = summarize_execution(report, num_tests, *time_taken, &mut execution_lines);
        combined = combined.combine(summary);
        for (index, line) in execution_lines.into_iter().enumerate() {
            let prefix = if index == 0 { "* " } else { "  " };
            lines.push(format!("{prefix}{line}"));
        }
    }
    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{reporter::TestOutcome, runner::JobIndex};
    use chrono::Local;
    use pretty_assertions::assert_eq;

    fn report(results: &[(&str, TestStatus, i32)]) -> TestReport {
        let job = JobIndex::new(0);
        let now = Local::now();
        let mut report = TestReport::new();
        for &(test, status, return_code) in results {
            if status == TestStatus::Skipped {
                report.skip_test(test, 0, job);
                continue;
            }
            report.start_test(test, 0, job, now);
            let outcome = TestOutcome {
                status,
                return_code: Some(return_code),
                end: now,
            };
            report.finish_test(test, 0, job, outcome);
        }
        report
    }

    #[test]
    fn all_passed() {
        let report = report(&[("a.js", TestStatus::Pass, 0), ("b.js", TestStatus::Pass, 0)]);
        let mut lines = Vec::new();
        let summary = summarize_execution(&report, 2, Duration::from_millis(1500), &mut lines);
        assert!(summary.all_passed());
        assert_eq!(lines, vec!["All 2 tests passed in 1.50 seconds."]);
    }

    #[test]
    fn failures_are_listed() {
        let report = report(&[
            ("a.js", TestStatus::Pass, 0),
            ("b.js", TestStatus::Fail, 1),
            ("c.js", TestStatus::Error, 0),
            ("d.js", TestStatus::Skipped, 0),
        ]);
        let mut lines = Vec::new();
        let summary = summarize_execution(&report, 4, Duration::from_secs(3), &mut lines);
        assert_eq!(
            summary,
            Summary {
                num_run: 3,
                time_taken: Duration::from_secs(3),
                num_succeeded: 1,
                num_skipped: 1,
                num_failed: 1,
                num_errored: 1,
            }
        );
        assert_eq!(
            lines,
            vec![
                "3 tests ran in 3.00 seconds (1 succeeded, 1 was skipped, 1 failed, 1 errored)",
                "The following tests failed (with exit code):",
                "    b.js (1)",
                "The following tests had errors:",
                "    c.js",
            ]
        );
    }

    #[test]
    fn repeated_executions_are_bulleted() {
        let passed = report(&[("a.js", TestStatus::Pass, 0)]);
        let failed = report(&[("a.js", TestStatus::Fail, 2)]);
        let mut lines = Vec::new();
        let summary = summarize_repeated(
            &[
                (passed, Duration::from_secs(1)),
                (failed, Duration::from_secs(2)),
            ],
            1,
            Duration::from_secs(3),
            &mut lines,
        );
        assert_eq!(summary.num_run, 2);
        assert_eq!(summary.num_failed, 1);
        assert_eq!(
            lines,
            vec![
                "Executed 2 times in 3.00 seconds:",
                "* All 1 test passed in 1.00 seconds.",
                "* 1 test ran in 2.00 seconds (0 succeeded, 0 were skipped, 1 failed, 0 errored)",
                "  The following tests failed (with exit code):",
                "      a.js (2)",
            ]
        );
    }
}
