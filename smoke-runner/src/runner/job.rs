// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::JobIndex;
use crate::{
    errors::{DisplayErrorChain, TestCaseErrorKind},
    fixtures::ManagedFixture,
    helpers::plural,
    reporter::{TestOutcome, TestStatus},
    signal::InterruptReceiver,
    test_case::TestCase,
    time::stopwatch,
};
use chrono::{DateTime, Local};
use smoke_metadata::SmokeExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info};

/// Something that happened to a test within a job, sent to the recorder.
#[derive(Clone, Debug)]
pub struct JobEvent {
    /// The job the test ran on.
    pub job: JobIndex,

    /// The execution of the group, starting at 0. Only nonzero with `--repeat`.
    pub execution: usize,

    /// The test's name.
    pub test: String,

    /// What happened.
    pub kind: JobEventKind,
}

/// The kind of a [`JobEvent`].
#[derive(Clone, Debug)]
pub enum JobEventKind {
    /// The test started.
    Started {
        /// When it started.
        start: DateTime<Local>,
    },

    /// The test finished.
    ///
    /// Interrupted tests never send this, and show up in the report as unfinished.
    Finished(TestOutcome),

    /// The test was never started, because the job or the group stopped first.
    Skipped,
}

/// What a lane does after a test.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Continuation {
    Continue,
    // Infrastructure errors are fatal to the job, but not to the others.
    StopLane,
    StopGroup,
    Interrupted,
}

/// Shared state for the lanes of one execution.
#[derive(Debug)]
pub(crate) struct LaneContext<'a> {
    pub(crate) execution: usize,
    pub(crate) events: UnboundedSender<JobEvent>,
    pub(crate) stop: &'a AtomicBool,
    pub(crate) interrupt: InterruptReceiver,
    pub(crate) fail_fast: bool,
}

impl LaneContext<'_> {
    fn send(&self, job: JobIndex, test: &str, kind: JobEventKind) {
        // The receiver only goes away once every lane has finished.
        let _ = self.events.send(JobEvent {
            job,
            execution: self.execution,
            test: test.to_owned(),
            kind,
        });
    }
}

/// A job: one fixture, and the lane of tests run against it.
#[derive(Debug)]
pub(crate) struct Job {
    index: JobIndex,
    fixture: ManagedFixture,
}

impl Job {
    pub(crate) fn new(index: JobIndex, fixture: ManagedFixture) -> Self {
        Self { index, fixture }
    }

    pub(crate) fn index(&self) -> JobIndex {
        self.index
    }

    pub(crate) fn fixture(&self) -> &ManagedFixture {
        &self.fixture
    }

    pub(crate) fn fixture_mut(&mut self) -> &mut ManagedFixture {
        &mut self.fixture
    }

    /// Runs `tests` in order against this job's fixture.
    ///
    /// Tests left over once the lane or the group stops are reported as skipped.
    pub(crate) async fn run(&mut self, tests: Vec<Box<dyn TestCase>>, mut cx: LaneContext<'_>) {
        let mut lane_stopped = false;
        let mut tests = tests.into_iter();
        while let Some(mut test) = tests.next() {
            let reason = if lane_stopped {
                Some("an error in this job")
            } else if cx.interrupt.is_interrupted() {
                Some("the run was interrupted")
            } else if cx.stop.load(Ordering::SeqCst) {
                Some("the group was stopped")
            } else {
                None
            };
            if let Some(reason) = reason {
                let skipped: Vec<_> = std::iter::once(test).chain(tests).collect();
                info!(
                    target: "smoke::job",
                    job = self.index.get(),
                    "skipping {} remaining {} after {reason}",
                    skipped.len(),
                    plural::tests_str(skipped.len()),
                );
                for test in skipped {
                    cx.send(self.index, test.core().name(), JobEventKind::Skipped);
                }
                break;
            }

            match self.run_one(&mut *test, &mut cx).await {
                Continuation::Continue => {}
                Continuation::StopLane => lane_stopped = true,
                Continuation::StopGroup => {
                    cx.stop.store(true, Ordering::SeqCst);
                }
                // The next iteration sees the interrupt and skips the rest.
                Continuation::Interrupted => {}
            }
        }
    }

    async fn run_one(&mut self, test: &mut dyn TestCase, cx: &mut LaneContext<'_>) -> Continuation {
        let name = test.core().name().to_owned();
        self.fixture.begin_tests();

        let watch = stopwatch();
        cx.send(
            self.index,
            &name,
            JobEventKind::Started {
                start: watch.start_time(),
            },
        );

        let result = match test.configure(self.fixture.fixture()) {
            Ok(()) => test.run_test(&mut cx.interrupt).await,
            Err(error) => {
                error!(
                    target: "smoke::job",
                    job = self.index.get(),
                    "failed to configure {}: {}",
                    test.core().description(),
                    DisplayErrorChain::new(&error),
                );
                Err(error)
            }
        };
        let end = watch.snapshot().end_time();

        let return_code = test.core().return_code();
        let (mut status, mut return_code, mut continuation) = match &result {
            Ok(()) => (TestStatus::Pass, return_code, Continuation::Continue),
            Err(error) => match error.kind() {
                TestCaseErrorKind::Failure => {
                    let continuation = if cx.fail_fast {
                        Continuation::StopGroup
                    } else {
                        Continuation::Continue
                    };
                    (TestStatus::Fail, return_code, continuation)
                }
                TestCaseErrorKind::Infrastructure => {
                    (TestStatus::Error, return_code, Continuation::StopLane)
                }
                TestCaseErrorKind::Interrupt => return Continuation::Interrupted,
            },
        };

        if !self.fixture.is_running() {
            error!(
                target: "smoke::job",
                job = self.index.get(),
                "{} marked as a failure because {} is not running",
                test.core().description(),
                self.fixture.fixture(),
            );
            status = TestStatus::Fail;
            return_code = Some(SmokeExitCode::INTERNAL_ERROR);
            continuation = Continuation::StopGroup;
        } else if continuation == Continuation::StopGroup {
            info!(
                target: "smoke::job",
                job = self.index.get(),
                "{} failed, stopping the group",
                test.core().description(),
            );
        }

        cx.send(
            self.index,
            &name,
            JobEventKind::Finished(TestOutcome {
                status,
                return_code,
                end,
            }),
        );
        continuation
    }
}
