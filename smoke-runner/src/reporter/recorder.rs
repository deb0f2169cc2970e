// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    TestReport,
    summary::{Summary, summarize_execution, summarize_repeated},
};
use crate::{
    runner::{JobEvent, JobEventKind},
    test_case::TestKind,
};
use chrono::{DateTime, Local};
use smoke_metadata::{GroupReport, ReportFile, SuiteReport};
use std::{
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

/// Identifies a suite registered with a [`RunRecorder`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct SuiteId(usize);

/// Identifies a test group registered with a [`RunRecorder`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct GroupId {
    suite: SuiteId,
    index: usize,
}

impl GroupId {
    /// The group at `index` within `suite`.
    pub fn new(suite: SuiteId, index: usize) -> Self {
        Self { suite, index }
    }

    /// The suite this group belongs to.
    pub fn suite(self) -> SuiteId {
        self.suite
    }
}

/// The live state of a run: every suite, group and test result recorded so far.
///
/// A `RunRecorder` is shared between the executor, which records events as jobs send them, and
/// the signal handler, which may [`snapshot`](Self::snapshot) it at any moment to write a
/// partial report.
#[derive(Debug, Default)]
pub struct RunRecorder {
    state: Mutex<RecorderState>,
}

#[derive(Debug, Default)]
struct RecorderState {
    suites: Vec<SuiteRecord>,
    interrupted: bool,
    exit_code: Option<i32>,
}

#[derive(Debug)]
struct SuiteRecord {
    name: String,
    start: Option<DateTime<Local>>,
    end: Option<DateTime<Local>>,
    return_code: Option<i32>,
    interrupted: bool,
    groups: Vec<GroupRecord>,
}

#[derive(Debug)]
struct GroupRecord {
    test_kind: TestKind,
    num_tests: usize,
    return_code: Option<i32>,
    executions: Vec<ExecutionRecord>,
}

#[derive(Debug)]
struct ExecutionRecord {
    start: DateTime<Local>,
    end: Option<DateTime<Local>>,
    // One report per job.
    reports: Vec<TestReport>,
}

impl ExecutionRecord {
    fn combined(&self, now: DateTime<Local>) -> TestReport {
        TestReport::combine(&self.reports, now)
    }

    fn time_taken(&self, now: DateTime<Local>) -> Duration {
        (self.end.unwrap_or(now) - self.start)
            .to_std()
            .unwrap_or_default()
    }
}

impl RunRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RecorderState> {
        // The report must still be written after a panic elsewhere.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a suite along with the kind and test count of each of its groups.
    pub fn add_suite(
        &self,
        name: &str,
        groups: impl IntoIterator<Item = (TestKind, usize)>,
    ) -> SuiteId {
        let groups = groups
            .into_iter()
            .map(|(test_kind, num_tests)| GroupRecord {
                test_kind,
                num_tests,
                return_code: None,
                executions: Vec::new(),
            })
            .collect();
        let mut state = self.lock();
        state.suites.push(SuiteRecord {
            name: name.to_owned(),
            start: None,
            end: None,
            return_code: None,
            interrupted: false,
            groups,
        });
        SuiteId(state.suites.len() - 1)
    }

    /// Records the start of a suite.
    pub fn suite_started(&self, suite: SuiteId, start: DateTime<Local>) {
        self.lock().suites[suite.0].start = Some(start);
    }

    /// Records the end of a suite.
    pub fn suite_finished(
        &self,
        suite: SuiteId,
        end: DateTime<Local>,
        return_code: i32,
        interrupted: bool,
    ) {
        let mut state = self.lock();
        let record = &mut state.suites[suite.0];
        record.end = Some(end);
        record.return_code = Some(return_code);
        record.interrupted = interrupted;
    }

    /// Starts a new execution of a group, run by `job_count` jobs. Returns the execution's
    /// index.
    pub fn execution_started(&self, group: GroupId, job_count: usize) -> usize {
        let mut state = self.lock();
        let executions = &mut state.group_mut(group).executions;
        executions.push(ExecutionRecord {
            start: Local::now(),
            end: None,
            reports: vec![TestReport::new(); job_count],
        });
        executions.len() - 1
    }

    /// Records an event sent by a job.
    pub fn record(&self, group: GroupId, event: &JobEvent) {
        let mut state = self.lock();
        let Some(execution) = state.group_mut(group).executions.get_mut(event.execution) else {
            return;
        };
        let Some(report) = execution.reports.get_mut(event.job.get()) else {
            return;
        };
        match &event.kind {
            JobEventKind::Started { start } => {
                report.start_test(&event.test, event.execution, event.job, *start);
            }
            JobEventKind::Finished(outcome) => {
                report.finish_test(&event.test, event.execution, event.job, *outcome);
            }
            JobEventKind::Skipped => report.skip_test(&event.test, event.execution, event.job),
        }
    }

    /// Ends an execution of a group, returning the combined report of its jobs.
    pub fn execution_finished(&self, group: GroupId, execution: usize) -> TestReport {
        let now = Local::now();
        let mut state = self.lock();
        match state.group_mut(group).executions.get_mut(execution) {
            Some(record) => {
                record.end = Some(now);
                record.combined(now)
            }
            None => TestReport::new(),
        }
    }

    /// Records the return code of a group.
    pub fn group_finished(&self, group: GroupId, return_code: i32) {
        self.lock().group_mut(group).return_code = Some(return_code);
    }

    /// Marks the whole run as interrupted.
    pub fn mark_interrupted(&self) {
        self.lock().interrupted = true;
    }

    /// Records the exit code of the run.
    pub fn set_exit_code(&self, exit_code: i32) {
        self.lock().exit_code = Some(exit_code);
    }

    /// Summarizes every execution of a group so far, one line per element.
    pub fn summarize_group(&self, group: GroupId) -> (Vec<String>, Summary) {
        let now = Local::now();
        let state = self.lock();
        let mut lines = Vec::new();
        let summary = state.group(group).summarize(now, &mut lines);
        (lines, summary)
    }

    /// Summarizes a suite, one line per element.
    pub fn summarize_suite(&self, suite: SuiteId) -> Vec<String> {
        let now = Local::now();
        let state = self.lock();
        let record = &state.suites[suite.0];
        let mut lines = Vec::new();
        match record.groups.as_slice() {
            [] => lines.push("No tests ran.".to_owned()),
            [group] => {
                group.summarize(now, &mut lines);
            }
            groups => {
                let mut group_lines = Vec::new();
                let mut total = Summary::default();
                for group in groups {
                    let mut current = Vec::new();
                    total = total.combine(group.summarize(now, &mut current));
                    group_lines.push(format!(
                        "    {}s: {}",
                        group.test_kind,
                        current.join("\n        ")
                    ));
                }
                lines.push(total.headline());
                lines.extend(group_lines);
            }
        }
        lines
    }

    /// Returns the run so far as a report file.
    ///
    /// Tests that are still running are reported as failed with exit code
    /// [`UNFINISHED_RETURN_CODE`](super::UNFINISHED_RETURN_CODE).
    pub fn snapshot(&self) -> ReportFile {
        let now = Local::now();
        let state = self.lock();
        let suites: Vec<_> = state
            .suites
            .iter()
            .map(|suite| SuiteReport {
                name: suite.name.clone(),
                return_code: suite.return_code,
                start: suite.start.map(|start| start.fixed_offset()),
                end: suite.end.map(|end| end.fixed_offset()),
                interrupted: suite.interrupted,
                groups: suite
                    .groups
                    .iter()
                    .map(|group| GroupReport {
                        test_kind: group.test_kind.to_string(),
                        return_code: group.return_code,
                        results: group
                            .executions
                            .iter()
                            .flat_map(|execution| execution.combined(now).tests().to_vec())
                            .map(|info| info.to_summary())
                            .collect(),
                    })
                    .collect(),
            })
            .collect();
        let failures = suites
            .iter()
            .flat_map(|suite| &suite.groups)
            .flat_map(|group| &group.results)
            .filter(|result| result.status.is_failure())
            .count();

        ReportFile {
            interrupted: state.interrupted,
            exit_code: state.exit_code,
            failures,
            suites,
        }
    }
}

impl RecorderState {
    fn group(&self, group: GroupId) -> &GroupRecord {
        &self.suites[group.suite.0].groups[group.index]
    }

    fn group_mut(&mut self, group: GroupId) -> &mut GroupRecord {
        &mut self.suites[group.suite.0].groups[group.index]
    }
}

impl GroupRecord {
    fn summarize(&self, now: DateTime<Local>, lines: &mut Vec<String>) -> Summary {
        match self.executions.as_slice() {
            [] => {
                lines.push("No tests ran.".to_owned());
                Summary::default()
            }
            [execution] => summarize_execution(
                &execution.combined(now),
                self.num_tests,
                execution.time_taken(now),
                lines,
            ),
            [first, .., last] => {
                let executions: Vec<_> = self
                    .executions
                    .iter()
                    .map(|execution| (execution.combined(now), execution.time_taken(now)))
                    .collect();
                let total_time = (last.end.unwrap_or(now) - first.start)
                    .to_std()
                    .unwrap_or_default();
                summarize_repeated(&executions, self.num_tests, total_time, lines)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        reporter::{TestOutcome, TestStatus},
        runner::JobIndex,
    };
    use pretty_assertions::assert_eq;
    use smoke_metadata::TestStatusKind;

    fn event(job: usize, test: &str, kind: JobEventKind) -> JobEvent {
        JobEvent {
            job: JobIndex::new(job),
            execution: 0,
            test: test.to_owned(),
            kind,
        }
    }

    fn finished(status: TestStatus, return_code: i32) -> JobEventKind {
        JobEventKind::Finished(TestOutcome {
            status,
            return_code: Some(return_code),
            end: Local::now(),
        })
    }

    #[test]
    fn snapshot_mid_run() {
        let recorder = RunRecorder::new();
        let suite = recorder.add_suite("core", [(TestKind::ScriptTest, 3)]);
        recorder.suite_started(suite, Local::now());
        let group = GroupId::new(suite, 0);
        let execution = recorder.execution_started(group, 2);
        assert_eq!(execution, 0);

        let start = JobEventKind::Started {
            start: Local::now(),
        };
        recorder.record(group, &event(0, "a.js", start.clone()));
        recorder.record(group, &event(0, "a.js", finished(TestStatus::Pass, 0)));
        recorder.record(group, &event(1, "b.js", start));
        recorder.mark_interrupted();

        let report = recorder.snapshot();
        assert!(report.interrupted);
        assert_eq!(report.exit_code, None);
        assert_eq!(report.failures, 1, "the running test counts as failed");
        let results: Vec<_> = report
            .iter_results()
            .map(|result| (result.test_file.as_str(), result.status, result.exit_code))
            .collect();
        assert_eq!(
            results,
            vec![
                ("a.js", TestStatusKind::Pass, Some(0)),
                ("b.js", TestStatusKind::Fail, Some(-2)),
            ]
        );
        assert_eq!(report.suites[0].end, None);
    }

    #[test]
    fn finished_suite() {
        let recorder = RunRecorder::new();
        let suite = recorder.add_suite(
            "mixed",
            [(TestKind::UnitTest, 1), (TestKind::ScriptTest, 0)],
        );
        let group = GroupId::new(suite, 0);
        let execution = recorder.execution_started(group, 1);
        recorder.record(
            group,
            &event(
                0,
                "db_test",
                JobEventKind::Started {
                    start: Local::now(),
                },
            ),
        );
        recorder.record(group, &event(0, "db_test", finished(TestStatus::Fail, 1)));
        let report = recorder.execution_finished(group, execution);
        assert_eq!(report.count(TestStatus::Fail), 1);
        recorder.group_finished(group, 1);
        recorder.suite_finished(suite, Local::now(), 1, false);
        recorder.set_exit_code(1);

        let file = recorder.snapshot();
        assert_eq!(file.exit_code, Some(1));
        assert_eq!(file.suites[0].return_code, Some(1));
        assert_eq!(file.suites[0].groups[0].test_kind, "unit-test");
        assert_eq!(file.suites[0].groups[0].return_code, Some(1));
        assert_eq!(file.suites[0].groups[1].results, vec![]);

        let lines = recorder.summarize_suite(suite);
        assert!(
            lines[0].starts_with("1 test ran in "),
            "unexpected headline: {}",
            lines[0]
        );
        assert!(lines[1].starts_with("    unit-tests: 1 test ran in "));
        assert_eq!(lines[2], "    script-tests: No tests ran.");
    }
}
