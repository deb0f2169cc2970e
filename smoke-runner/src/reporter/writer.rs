// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::ReportWriteError;
use atomicwrites::{AtomicFile, OverwriteBehavior};
use camino::{Utf8Path, Utf8PathBuf};
use quick_junit::{NonSuccessKind, Report, TestCaseStatus, TestSuite};
use smoke_metadata::{ReportFile, TestStatusKind};
use std::{io::Write, time::Duration};
use tracing::debug;

/// The name of the JUnit report.
pub const JUNIT_REPORT_NAME: &str = "smoke";

/// Writes report files.
///
/// Files are replaced atomically, so a report written from the signal handler and one written at
/// the end of the run never interleave.
#[derive(Clone, Debug, Default)]
pub struct ReportWriter {
    report_file: Option<Utf8PathBuf>,
    junit_file: Option<Utf8PathBuf>,
}

impl ReportWriter {
    /// Creates a writer for the given paths. Reports whose path is `None` aren't written.
    pub fn new(report_file: Option<Utf8PathBuf>, junit_file: Option<Utf8PathBuf>) -> Self {
        Self {
            report_file,
            junit_file,
        }
    }

    /// Writes `report` to every configured path.
    pub fn write(&self, report: &ReportFile) -> Result<(), ReportWriteError> {
        if let Some(path) = &self.report_file {
            write_json(path, report)?;
        }
        if let Some(path) = &self.junit_file {
            write_junit(path, report)?;
        }
        Ok(())
    }
}

fn create_parent(path: &Utf8Path) -> Result<(), ReportWriteError> {
    match path.parent() {
        Some(dir) if !dir.as_str().is_empty() => {
            std::fs::create_dir_all(dir).map_err(|error| ReportWriteError::CreateDir {
                path: dir.to_owned(),
                error,
            })
        }
        _ => Ok(()),
    }
}

fn write_json(path: &Utf8Path, report: &ReportFile) -> Result<(), ReportWriteError> {
    let json = serde_json::to_string_pretty(report).map_err(ReportWriteError::Serialize)?;
    create_parent(path)?;
    AtomicFile::new(path, OverwriteBehavior::AllowOverwrite)
        .write(|file| file.write_all(json.as_bytes()))
        .map_err(|error| ReportWriteError::Json {
            path: path.to_owned(),
            error,
        })?;
    debug!(target: "smoke::report", "wrote report to {path}");
    Ok(())
}

fn write_junit(path: &Utf8Path, report: &ReportFile) -> Result<(), ReportWriteError> {
    let junit = to_junit(report);
    create_parent(path)?;
    AtomicFile::new(path, OverwriteBehavior::AllowOverwrite)
        .write(|file| junit.serialize(file))
        .map_err(|error| ReportWriteError::Junit {
            path: path.to_owned(),
            error,
        })?;
    debug!(target: "smoke::report", "wrote JUnit report to {path}");
    Ok(())
}

/// Converts a report file into a JUnit report: one test suite per suite, with each test's kind
/// as its class name.
pub fn to_junit(report: &ReportFile) -> Report {
    let mut junit = Report::new(JUNIT_REPORT_NAME);
    for suite in &report.suites {
        let mut test_suite = TestSuite::new(suite.name.as_str());
        if let Some(start) = suite.start {
            test_suite.set_timestamp(start);
        }
        if let (Some(start), Some(end)) = (suite.start, suite.end) {
            test_suite.set_time((end - start).to_std().unwrap_or_default());
        }

        for group in &suite.groups {
            for result in &group.results {
                let status = match result.status {
                    TestStatusKind::Pass => TestCaseStatus::success(),
                    TestStatusKind::Skipped => TestCaseStatus::skipped(),
                    TestStatusKind::Fail | TestStatusKind::Error => {
                        let kind = if result.status == TestStatusKind::Fail {
                            NonSuccessKind::Failure
                        } else {
                            NonSuccessKind::Error
                        };
                        let mut status = TestCaseStatus::non_success(kind);
                        if let Some(exit_code) = result.exit_code {
                            status.set_message(format!("exit code {exit_code}"));
                        }
                        status
                    }
                };
                let mut test_case = quick_junit::TestCase::new(result.test_file.as_str(), status);
                test_case.set_classname(group.test_kind.as_str());
                if let Some(start) = result.start {
                    test_case.set_timestamp(start);
                }
                if let Some(elapsed) = result.elapsed {
                    test_case.set_time(Duration::from_secs_f64(elapsed.max(0.0)));
                }
                test_suite.add_test_case(test_case);
            }
        }
        junit.add_test_suite(test_suite);
    }
    junit
}
