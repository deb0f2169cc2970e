// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    JobIndex, TestGroup,
    job::{Job, JobEvent, LaneContext},
    partition,
};
use crate::{
    config::{GroupExecutorConfig, RunConfig},
    errors::{DisplayErrorChain, ExecutorError, UserInterrupt},
    fixtures::{AdminClient, FixtureContext, FixturePhase, ManagedFixture},
    network::PortAllocator,
    reporter::{GroupId, RunRecorder, TestReport, summarize_execution},
    signal::InterruptController,
    test_case::{TestCase, TestKind, make_test_case},
    time::stopwatch,
};
use async_scoped::TokioScope;
use smoke_metadata::SmokeExitCode;
use std::{
    num::NonZeroUsize,
    sync::{Arc, atomic::AtomicBool},
};
use tokio::{runtime::Runtime, sync::mpsc::unbounded_channel};
use tracing::{error, info, warn};

/// What a [`TestGroupExecutor`] borrows from the driver.
#[derive(Clone, Debug)]
pub struct ExecutorContext<'a> {
    /// Settings for the run.
    pub run_config: &'a RunConfig,

    /// The runtime jobs run on.
    pub runtime: &'a Runtime,

    /// The run's interrupt state.
    pub interrupt: &'a InterruptController,

    /// Where results go.
    pub recorder: &'a RunRecorder,

    /// The client fixtures use for administrative commands.
    pub admin: Arc<dyn AdminClient>,
}

/// Runs one test group: sets up a fixture per job, runs the tests across jobs, and tears the
/// fixtures down again.
#[derive(Debug)]
pub struct TestGroupExecutor<'a> {
    cx: ExecutorContext<'a>,
    test_kind: TestKind,
    config: GroupExecutorConfig,
    group_id: GroupId,
    jobs: Vec<Job>,
}

impl<'a> TestGroupExecutor<'a> {
    /// Creates an executor for `group`, constructing (but not starting) one fixture per job.
    ///
    /// A group never gets more jobs than it has tests.
    pub fn new(
        cx: ExecutorContext<'a>,
        group: &TestGroup,
        group_id: GroupId,
        config: GroupExecutorConfig,
    ) -> Result<Self, ExecutorError> {
        let job_count = job_count(cx.run_config.jobs, group.tests().len());
        let allocator = PortAllocator::new(cx.run_config.base_port, job_count)?;
        let jobs = (0..job_count.get())
            .map(|index| {
                let index = JobIndex::new(index);
                let fixture_cx = FixtureContext {
                    ports: Arc::new(allocator.job_ports(index)?),
                    admin: cx.admin.clone(),
                    run_config: cx.run_config,
                };
                let fixture = config
                    .fixture
                    .build(&fixture_cx)
                    .map_err(|error| ExecutorError::FixtureCreate { job: index, error })?;
                Ok(Job::new(index, ManagedFixture::new(fixture)))
            })
            .collect::<Result<Vec<_>, ExecutorError>>()?;

        Ok(Self {
            cx,
            test_kind: group.test_kind(),
            config,
            group_id,
            jobs,
        })
    }

    /// The number of jobs this executor runs.
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Executes the group, recording its return code on `group` and with the recorder.
    ///
    /// The return code is 0 if every test passed, 1 if any failed, and 2 if a fixture couldn't
    /// be set up or torn down cleanly or a job panicked. Fixtures are always torn down, including
    /// after an interrupt, which is returned as an error.
    pub fn execute(mut self, group: &mut TestGroup) -> Result<i32, UserInterrupt> {
        info!(
            target: "smoke::executor",
            "starting execution of {}s with {} {}...",
            self.test_kind,
            self.jobs.len(),
            if self.jobs.len() == 1 { "job" } else { "jobs" },
        );

        let runtime = self.cx.runtime;
        let result = match runtime.block_on(self.setup_fixtures()) {
            Ok(true) => self.run_executions(group),
            Ok(false) => Ok(SmokeExitCode::INTERNAL_ERROR),
            Err(interrupt) => Err(interrupt),
        };

        let clean = runtime.block_on(self.teardown_fixtures());
        let return_code = match &result {
            Ok(_) if !clean => SmokeExitCode::INTERNAL_ERROR,
            Ok(return_code) => *return_code,
            Err(_) => SmokeExitCode::INTERRUPTED,
        };
        group.set_return_code(return_code);
        self.cx.recorder.group_finished(self.group_id, return_code);
        result.map(|_| return_code)
    }

    /// Sets up every job's fixture, then waits for all of them to be ready. Returns false if any
    /// fixture failed.
    async fn setup_fixtures(&mut self) -> Result<bool, UserInterrupt> {
        let mut interrupt = self.cx.interrupt.subscribe();
        tokio::select! {
            ready = setup_all(&mut self.jobs) => Ok(ready),
            event = interrupt.interrupted() => {
                warn!(
                    target: "smoke::executor",
                    "received {event} while setting up fixtures",
                );
                Err(UserInterrupt::new(event))
            }
        }
    }

    async fn teardown_fixtures(&mut self) -> bool {
        let mut clean = true;
        for job in &mut self.jobs {
            let fixture = job.fixture_mut();
            if matches!(
                fixture.phase(),
                FixturePhase::Created | FixturePhase::Stopped
            ) {
                continue;
            }
            match fixture.teardown().await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(
                        target: "smoke::executor",
                        "teardown of {} was not successful",
                        fixture.fixture(),
                    );
                    clean = false;
                }
                Err(error) => {
                    error!(
                        target: "smoke::executor",
                        "encountered an error while tearing down {}: {}",
                        fixture.fixture(),
                        DisplayErrorChain::new(&error),
                    );
                    clean = false;
                }
            }
        }
        clean
    }

    fn run_executions(&mut self, group: &TestGroup) -> Result<i32, UserInterrupt> {
        let mut return_code = SmokeExitCode::OK;
        for _ in 0..self.cx.run_config.repeat.get() {
            let watch = stopwatch();
            let (report, lanes_ok) = self.run_tests(group);

            let mut lines = Vec::new();
            summarize_execution(
                &report,
                group.tests().len(),
                watch.snapshot().duration,
                &mut lines,
            );
            info!(
                target: "smoke::executor",
                "summary: {}",
                lines.join("\n    "),
            );

            if let Some(event) = self.cx.interrupt.event() {
                return Err(UserInterrupt::new(event));
            }
            if !lanes_ok {
                return Ok(SmokeExitCode::INTERNAL_ERROR);
            }
            if !report.was_successful() {
                return_code = SmokeExitCode::TEST_RUN_FAILED;
                if self.cx.run_config.fail_fast {
                    break;
                }
            }
        }
        Ok(return_code)
    }

    /// Runs one execution of the group. Returns the combined report, and false if a job panicked.
    fn run_tests(&mut self, group: &TestGroup) -> (TestReport, bool) {
        let run_config = self.cx.run_config;
        let recorder = self.cx.recorder;
        let interrupt = self.cx.interrupt;
        let group_id = self.group_id;

        let tests: Vec<Box<dyn TestCase>> = group
            .tests()
            .iter()
            .map(|test| make_test_case(self.test_kind, test, &self.config.config, run_config))
            .collect();
        let lanes = partition(tests, self.jobs.len());
        let execution = recorder.execution_started(group_id, self.jobs.len());

        let stop = AtomicBool::new(false);
        let stop = &stop;
        let jobs = &mut self.jobs;

        let _guard = self.cx.runtime.enter();
        let ((), results) = TokioScope::scope_and_block(move |scope| {
            let (event_tx, mut event_rx) = unbounded_channel::<JobEvent>();

            scope.spawn_cancellable(
                async move {
                    while let Some(event) = event_rx.recv().await {
                        recorder.record(group_id, &event);
                    }
                },
                || (),
            );

            for (job, tests) in jobs.iter_mut().zip(lanes) {
                let cx = LaneContext {
                    execution,
                    events: event_tx.clone(),
                    stop,
                    interrupt: interrupt.subscribe(),
                    fail_fast: run_config.fail_fast,
                };
                scope.spawn_cancellable(job.run(tests, cx), || ());
            }
        });

        let mut lanes_ok = true;
        for result in results {
            if let Err(error) = result {
                error!(
                    target: "smoke::executor",
                    "encountered an error during test execution: {error}",
                );
                lanes_ok = false;
            }
        }
        (recorder.execution_finished(group_id, execution), lanes_ok)
    }
}

async fn setup_all(jobs: &mut [Job]) -> bool {
    for job in jobs.iter_mut() {
        let fixture = job.fixture_mut();
        if let Err(error) = fixture.setup().await {
            error!(
                target: "smoke::executor",
                "encountered an error while setting up {}: {}",
                fixture.fixture(),
                DisplayErrorChain::new(&error),
            );
            return false;
        }
    }

    // Fixtures start in order, but can come up concurrently.
    let results =
        futures::future::join_all(jobs.iter_mut().map(|job| job.fixture_mut().await_ready()))
            .await;
    let mut ready = true;
    for (job, result) in jobs.iter().zip(results) {
        if let Err(error) = result {
            error!(
                target: "smoke::executor",
                job = job.index().get(),
                "encountered an error while waiting for {} to be ready: {}",
                job.fixture().fixture(),
                DisplayErrorChain::new(&error),
            );
            ready = false;
        }
    }
    ready
}

fn job_count(jobs: NonZeroUsize, num_tests: usize) -> NonZeroUsize {
    NonZeroUsize::new(num_tests).map_or(NonZeroUsize::MIN, |num_tests| num_tests.min(jobs))
}
