// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::runner::JobIndex;
use chrono::{DateTime, Local};
use smoke_metadata::{TestResultSummary, TestStatusKind};
use std::{fmt, time::Duration};

/// The exit code recorded for tests that started but never finished.
pub const UNFINISHED_RETURN_CODE: i32 = -2;

/// The outcome of one test run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TestStatus {
    /// The test exited with code 0.
    Pass,

    /// The test exited with a nonzero code, or its fixture crashed while it ran.
    Fail,

    /// The test couldn't be run because of an infrastructure error.
    Error,

    /// The test started but never finished, usually because the run was interrupted.
    Timeout,

    /// The test was never started.
    Skipped,
}

impl TestStatus {
    /// Returns true if this status makes a test group fail.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Fail | Self::Error | Self::Timeout)
    }

    /// The status written to report files, which don't distinguish timeouts from failures.
    pub fn to_report_status(self) -> TestStatusKind {
        match self {
            Self::Pass => TestStatusKind::Pass,
            Self::Fail | Self::Timeout => TestStatusKind::Fail,
            Self::Error => TestStatusKind::Error,
            Self::Skipped => TestStatusKind::Skipped,
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Status and timing of one test run.
#[derive(Clone, Debug, PartialEq)]
pub struct TestInfo {
    /// The test's identifier.
    pub test_file: String,

    /// Which execution of the group this run belongs to, starting at 0.
    pub execution: usize,

    /// The job that ran (or would have run) the test.
    pub job: JobIndex,

    /// The outcome, once known.
    pub status: Option<TestStatus>,

    /// The test's exit code, once known.
    pub return_code: Option<i32>,

    /// When the test started. `None` for skipped tests.
    pub start: Option<DateTime<Local>>,

    /// When the test finished.
    pub end: Option<DateTime<Local>>,
}

impl TestInfo {
    /// How long the test ran for, if it both started and finished.
    pub fn elapsed(&self) -> Option<Duration> {
        let (start, end) = (self.start?, self.end?);
        (end - start).to_std().ok()
    }

    /// Converts this run into its report file representation.
    pub fn to_summary(&self) -> TestResultSummary {
        TestResultSummary {
            test_file: self.test_file.clone(),
            execution: self.execution,
            status: self
                .status
                .unwrap_or(TestStatus::Timeout)
                .to_report_status(),
            exit_code: self.return_code,
            start: self.start.map(|start| start.fixed_offset()),
            end: self.end.map(|end| end.fixed_offset()),
            elapsed: self.elapsed().map(|elapsed| elapsed.as_secs_f64()),
        }
    }
}

/// The results of the tests run by one job during one execution of a test group.
///
/// Tests are kept in the order they started. Reports from the jobs of an execution are merged
/// with [`TestReport::combine`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TestReport {
    tests: Vec<TestInfo>,
}

impl TestReport {
    /// Creates an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges `reports` into one.
    ///
    /// Tests that started without an outcome are marked [`TestStatus::Timeout`] with exit code
    /// [`UNFINISHED_RETURN_CODE`]: they might have passed had the run finished, but there's no
    /// way to know. Tests without an end time are given `now`.
    pub fn combine<'a>(
        reports: impl IntoIterator<Item = &'a TestReport>,
        now: DateTime<Local>,
    ) -> Self {
        let tests = reports
            .into_iter()
            .flat_map(|report| report.tests.iter())
            .map(|info| {
                let mut info = info.clone();
                if info.status.is_none() {
                    info.status = Some(TestStatus::Timeout);
                    info.return_code = Some(UNFINISHED_RETURN_CODE);
                }
                if info.end.is_none() && info.status != Some(TestStatus::Skipped) {
                    info.end = Some(now);
                }
                info
            })
            .collect();
        Self { tests }
    }

    /// Records that a test has started.
    pub fn start_test(
        &mut self,
        test_file: &str,
        execution: usize,
        job: JobIndex,
        start: DateTime<Local>,
    ) {
        self.tests.push(TestInfo {
            test_file: test_file.to_owned(),
            execution,
            job,
            status: None,
            return_code: None,
            start: Some(start),
            end: None,
        });
    }

    /// Records the outcome of a started test.
    ///
    /// A test that was never started is recorded without a start time.
    pub fn finish_test(
        &mut self,
        test_file: &str,
        execution: usize,
        job: JobIndex,
        outcome: TestOutcome,
    ) {
        // The most recent unfinished run of the test is the one that just ended.
        let position = self.tests.iter().rposition(|info| {
            info.test_file == test_file && info.execution == execution && info.status.is_none()
        });
        let info = match position {
            Some(position) => &mut self.tests[position],
            None => {
                self.tests.push(TestInfo {
                    test_file: test_file.to_owned(),
                    execution,
                    job,
                    status: None,
                    return_code: None,
                    start: None,
                    end: None,
                });
                let last = self.tests.len() - 1;
                &mut self.tests[last]
            }
        };
        info.status = Some(outcome.status);
        info.return_code = outcome.return_code;
        info.end = Some(outcome.end);
    }

    /// Records a test that was never started.
    pub fn skip_test(&mut self, test_file: &str, execution: usize, job: JobIndex) {
        self.tests.push(TestInfo {
            test_file: test_file.to_owned(),
            execution,
            job,
            status: Some(TestStatus::Skipped),
            return_code: None,
            start: None,
            end: None,
        });
    }

    /// The tests in this report, in the order they started.
    pub fn tests(&self) -> &[TestInfo] {
        &self.tests
    }

    /// Returns the tests with the given status.
    pub fn with_status(&self, status: TestStatus) -> impl Iterator<Item = &TestInfo> + '_ {
        self.tests
            .iter()
            .filter(move |info| info.status == Some(status))
    }

    /// Returns the number of tests with the given status.
    pub fn count(&self, status: TestStatus) -> usize {
        self.with_status(status).count()
    }

    /// Returns true if no test failed, errored, or was left unfinished.
    pub fn was_successful(&self) -> bool {
        self.tests
            .iter()
            .all(|info| info.status.is_some_and(|status| !status.is_failure()))
    }
}

/// How a test run ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TestOutcome {
    /// The outcome.
    pub status: TestStatus,

    /// The exit code to record.
    pub return_code: Option<i32>,

    /// When the test finished.
    pub end: DateTime<Local>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at(secs: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 1, 1, 0, 0, secs)
            .single()
            .expect("unambiguous time")
    }

    fn outcome(status: TestStatus, return_code: i32, end: u32) -> TestOutcome {
        TestOutcome {
            status,
            return_code: Some(return_code),
            end: at(end),
        }
    }

    #[test]
    fn combine_marks_unfinished_tests() {
        let job0 = JobIndex::new(0);
        let job1 = JobIndex::new(1);

        let mut first = TestReport::new();
        first.start_test("a.js", 0, job0, at(0));
        first.finish_test("a.js", 0, job0, outcome(TestStatus::Pass, 0, 1));
        first.start_test("c.js", 0, job0, at(1));

        let mut second = TestReport::new();
        second.start_test("b.js", 0, job1, at(0));
        second.finish_test("b.js", 0, job1, outcome(TestStatus::Fail, 3, 2));
        second.skip_test("d.js", 0, job1);

        let combined = TestReport::combine([&first, &second], at(5));
        let statuses: Vec<_> = combined
            .tests()
            .iter()
            .map(|info| (info.test_file.as_str(), info.status, info.return_code))
            .collect();
        assert_eq!(
            statuses,
            vec![
                ("a.js", Some(TestStatus::Pass), Some(0)),
                ("c.js", Some(TestStatus::Timeout), Some(UNFINISHED_RETURN_CODE)),
                ("b.js", Some(TestStatus::Fail), Some(3)),
                ("d.js", Some(TestStatus::Skipped), None),
            ]
        );
        assert_eq!(combined.tests()[1].end, Some(at(5)));
        assert_eq!(combined.tests()[1].elapsed(), Some(Duration::from_secs(4)));
        assert_eq!(combined.tests()[3].end, None, "skipped tests have no timing");
        assert!(!combined.was_successful());

        // The source reports are untouched.
        assert_eq!(first.tests()[1].status, None);
    }

    #[test]
    fn repeated_runs_are_tracked_separately() {
        let job = JobIndex::new(0);
        let mut report = TestReport::new();
        report.start_test("a.js", 0, job, at(0));
        report.finish_test("a.js", 0, job, outcome(TestStatus::Pass, 0, 1));
        report.start_test("a.js", 1, job, at(2));
        report.finish_test("a.js", 1, job, outcome(TestStatus::Fail, 1, 3));

        assert_eq!(report.count(TestStatus::Pass), 1);
        assert_eq!(report.count(TestStatus::Fail), 1);
        let summary = report.tests()[1].to_summary();
        assert_eq!(summary.execution, 1);
        assert_eq!(summary.status, TestStatusKind::Fail);
        assert_eq!(summary.exit_code, Some(1));
        assert_eq!(summary.elapsed, Some(1.0));
    }

    #[test]
    fn timeout_is_reported_as_failure() {
        assert!(TestStatus::Timeout.is_failure());
        assert!(!TestStatus::Skipped.is_failure());
        assert_eq!(
            TestStatus::Timeout.to_report_status(),
            TestStatusKind::Fail
        );
        assert_eq!(TestStatus::Error.to_report_status(), TestStatusKind::Error);
    }
}
