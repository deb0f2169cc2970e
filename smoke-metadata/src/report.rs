// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The root of the persisted report file.
///
/// A report file is written whenever a run ends, however it ends. If the run was interrupted, the
/// report contains every test that finished before the interrupt, and `interrupted` is set.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ReportFile {
    /// True if the run was cut short by the user or by the CI timeout signal.
    pub interrupted: bool,

    /// The exit code the run finished (or is finishing) with, if it is known yet.
    ///
    /// This is `None` for snapshots written from the signal handler while the run is in progress.
    pub exit_code: Option<i32>,

    /// The number of tests that did not pass, across all suites.
    ///
    /// Errored and interrupted tests count as failures. Skipped tests do not.
    pub failures: usize,

    /// The suites in the order they were executed.
    pub suites: Vec<SuiteReport>,
}

impl ReportFile {
    /// Parses a report file from a JSON string.
    pub fn parse_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Iterates over every test result in the report, across suites and groups.
    pub fn iter_results(&self) -> impl Iterator<Item = &TestResultSummary> + '_ {
        self.suites
            .iter()
            .flat_map(|suite| suite.groups.iter())
            .flat_map(|group| group.results.iter())
    }
}

/// The report for a single suite.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct SuiteReport {
    /// The name of the suite.
    pub name: String,

    /// The aggregate return code of the suite, or `None` if the suite hasn't finished.
    pub return_code: Option<i32>,

    /// When the suite started executing, if it did.
    pub start: Option<DateTime<FixedOffset>>,

    /// When the suite finished executing, if it did.
    pub end: Option<DateTime<FixedOffset>>,

    /// True if the suite was interrupted.
    pub interrupted: bool,

    /// Test groups, one per test kind.
    pub groups: Vec<GroupReport>,
}

/// The report for a single test group.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct GroupReport {
    /// The kind of tests in this group, e.g. `script-test`.
    pub test_kind: String,

    /// The return code of the group, or `None` if the group hasn't finished.
    pub return_code: Option<i32>,

    /// The results of every test, across all executions of the group.
    pub results: Vec<TestResultSummary>,
}

/// The outcome of a single test.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct TestResultSummary {
    /// The identifier of the test: a file path, an executable path or a suite name.
    pub test_file: String,

    /// The zero-based execution this result belongs to, when a group is repeated.
    pub execution: usize,

    /// The outcome.
    pub status: TestStatusKind,

    /// The exit code of the test process, if it ran.
    pub exit_code: Option<i32>,

    /// When the test started.
    pub start: Option<DateTime<FixedOffset>>,

    /// When the test finished.
    pub end: Option<DateTime<FixedOffset>>,

    /// The time taken, in seconds.
    pub elapsed: Option<f64>,
}

/// Outcome recorded in the report file.
///
/// Tests that were still running when the run was interrupted are recorded as failures with exit
/// code -2.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum TestStatusKind {
    /// The test passed.
    Pass,

    /// The test exited with a nonzero code, or was interrupted.
    Fail,

    /// The harness hit an infrastructure error while running the test.
    Error,

    /// The test was never started.
    Skipped,
}

impl TestStatusKind {
    /// Returns true if this outcome counts towards [`ReportFile::failures`].
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Fail | Self::Error)
    }
}

impl fmt::Display for TestStatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Fail => write!(f, "fail"),
            Self::Error => write!(f, "error"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test]
    fn parse_interrupted_report() {
        let json = r#"{
            "interrupted": true,
            "exit_code": 130,
            "failures": 1,
            "suites": [{
                "name": "core",
                "return_code": 130,
                "start": "2024-01-01T00:00:00+00:00",
                "end": null,
                "interrupted": true,
                "groups": [{
                    "test_kind": "script-test",
                    "return_code": 130,
                    "results": [
                        {
                            "test_file": "a.js",
                            "execution": 0,
                            "status": "pass",
                            "exit_code": 0,
                            "start": "2024-01-01T00:00:00+00:00",
                            "end": "2024-01-01T00:00:01+00:00",
                            "elapsed": 1.0
                        },
                        {
                            "test_file": "b.js",
                            "execution": 0,
                            "status": "fail",
                            "exit_code": -2,
                            "start": "2024-01-01T00:00:00+00:00",
                            "end": "2024-01-01T00:00:02+00:00",
                            "elapsed": 2.0
                        }
                    ]
                }]
            }]
        }"#;

        let report = ReportFile::parse_json(json).expect("report parses");
        assert!(report.interrupted);
        assert_eq!(report.exit_code, Some(130));
        let files: Vec<_> = report
            .iter_results()
            .map(|r| (r.test_file.as_str(), r.status))
            .collect();
        assert_eq!(
            files,
            vec![("a.js", TestStatusKind::Pass), ("b.js", TestStatusKind::Fail)]
        );
    }

    #[test_case(TestStatusKind::Pass, false; "pass")]
    #[test_case(TestStatusKind::Fail, true; "fail")]
    #[test_case(TestStatusKind::Error, true; "error")]
    #[test_case(TestStatusKind::Skipped, false; "skipped")]
    fn status_failure(status: TestStatusKind, is_failure: bool) {
        assert_eq!(status.is_failure(), is_failure);
    }
}
