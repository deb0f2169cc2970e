// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{ExecutorContext, Suite, TestGroup, TestGroupExecutor};
use crate::{
    config::{GroupExecutorConfig, RunConfig, default_executables},
    errors::{DisplayErrorChain, ReportWriteError, RunnerBuildError},
    fixtures::{AdminClient, ShellAdminClient},
    network::PortAllocator,
    reporter::{GroupId, ReportWriter, RunRecorder, SuiteId},
    signal::{InterruptController, SignalHandlerKind, SignalListener},
    test_case::make_test_case,
};
use itertools::Itertools;
use smoke_metadata::SmokeExitCode;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::{error, info, warn};

/// Test runner options.
#[derive(Debug, Default)]
pub struct SuiteDriverBuilder {
    admin: Option<Arc<dyn AdminClient>>,
}

impl SuiteDriverBuilder {
    /// Sets the client fixtures use for administrative commands.
    ///
    /// By default, commands are sent through the shell executable.
    pub fn set_admin_client(&mut self, admin: Arc<dyn AdminClient>) -> &mut Self {
        self.admin = Some(admin);
        self
    }

    /// Creates a new suite driver.
    pub fn build(
        self,
        run_config: RunConfig,
        signal_handler: SignalHandlerKind,
    ) -> Result<SuiteDriver, RunnerBuildError> {
        // Fail before anything starts if the jobs can't all get ports.
        PortAllocator::new(run_config.base_port, run_config.jobs)?;

        let admin = self.admin.unwrap_or_else(|| {
            let shell = run_config
                .executables
                .shell
                .clone()
                .unwrap_or_else(|| default_executables::SHELL.into());
            Arc::new(ShellAdminClient::new(shell))
        });

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("smoke-runner-worker")
            .build()
            .map_err(RunnerBuildError::TokioRuntimeCreate)?;
        let _guard = runtime.enter();

        let recorder = Arc::new(RunRecorder::new());
        let writer = ReportWriter::new(run_config.report_file.clone(), run_config.junit_file.clone());
        let interrupt = InterruptController::new();

        // The listener must be installed from within the guard.
        let listener = {
            let recorder = recorder.clone();
            let writer = writer.clone();
            interrupt.install(signal_handler, runtime.handle(), move |_event| {
                recorder.mark_interrupted();
                if let Err(error) = writer.write(&recorder.snapshot()) {
                    warn!(
                        target: "smoke::driver",
                        "failed to write report after interrupt: {}",
                        DisplayErrorChain::new(&error),
                    );
                }
            })?
        };

        Ok(SuiteDriver {
            run_config,
            interrupt,
            recorder,
            writer,
            admin,
            _listener: listener,
            runtime,
        })
    }
}

/// How a run ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RunOutcome {
    /// The process exit code: 130 if interrupted, otherwise the highest suite return code.
    pub exit_code: i32,

    /// Whether the run was interrupted.
    pub interrupted: bool,
}

/// Runs suites, one after the other.
///
/// Created with [`SuiteDriverBuilder`].
#[derive(Debug)]
pub struct SuiteDriver {
    run_config: RunConfig,
    interrupt: InterruptController,
    recorder: Arc<RunRecorder>,
    writer: ReportWriter,
    admin: Arc<dyn AdminClient>,
    _listener: SignalListener,
    runtime: Runtime,
}

impl SuiteDriver {
    /// The run's settings.
    pub fn run_config(&self) -> &RunConfig {
        &self.run_config
    }

    /// The run's interrupt state. Interrupting it has the same effect as a signal.
    pub fn interrupt_controller(&self) -> &InterruptController {
        &self.interrupt
    }

    /// The results recorded so far.
    pub fn recorder(&self) -> &RunRecorder {
        &self.recorder
    }

    /// Runs every suite in order.
    ///
    /// Stops early after an interrupt, or after a suite fails with fail-fast on. The report is
    /// written however the run ends, including if this panics; only a failure to write it on the
    /// normal path is returned as an error.
    pub fn run_all(&self, suites: &mut [Suite]) -> Result<RunOutcome, ReportWriteError> {
        let ids: Vec<SuiteId> = suites
            .iter()
            .map(|suite| {
                self.recorder.add_suite(
                    suite.name(),
                    suite
                        .groups()
                        .iter()
                        .map(|group| (group.test_kind(), group.tests().len())),
                )
            })
            .collect();
        let guard = ReportGuard {
            writer: &self.writer,
            recorder: &self.recorder,
            finished: false,
        };

        let mut ran = Vec::new();
        for (suite, &id) in suites.iter_mut().zip(&ids) {
            if self.interrupt.is_interrupted() {
                break;
            }
            self.run_suite(suite, id);
            ran.push(id);

            if suite.is_interrupted() {
                break;
            }
            if self.run_config.fail_fast && suite.return_code() != SmokeExitCode::OK {
                info!(
                    target: "smoke::driver",
                    "stopping after suite {} failed",
                    suite.name(),
                );
                break;
            }
        }

        if ran.len() > 1 {
            let lines = suites.iter().zip(&ran).map(|(suite, &id)| {
                format!(
                    "{}: {}",
                    suite.name(),
                    self.recorder.summarize_suite(id).join("\n    ")
                )
            });
            info!(
                target: "smoke::driver",
                "{}\nSummary of all suites:\n{}",
                "=".repeat(80),
                lines.format("\n"),
            );
        }

        let interrupted = self.interrupt.is_interrupted();
        let exit_code = if interrupted {
            self.recorder.mark_interrupted();
            SmokeExitCode::INTERRUPTED
        } else {
            suites
                .iter()
                .map(Suite::return_code)
                .max()
                .unwrap_or(SmokeExitCode::OK)
        };
        self.recorder.set_exit_code(exit_code);
        guard.finish()?;

        Ok(RunOutcome {
            exit_code,
            interrupted,
        })
    }

    fn run_suite(&self, suite: &mut Suite, id: SuiteId) {
        let start = suite.record_start();
        self.recorder.suite_started(id, start);

        let (name, config, groups) = suite.parts_mut();
        let name = name.to_owned();
        let mut interrupted = false;
        for (index, group) in groups.iter_mut().enumerate() {
            let group_id = GroupId::new(id, index);
            let kind = group.test_kind();
            if self.run_config.shuffle {
                info!(
                    target: "smoke::driver",
                    "shuffling order of {kind}s in suite {name} with seed {}",
                    self.run_config.seed,
                );
                group.shuffle(self.run_config.seed);
            }
            let executor_config = config.executor_config(kind);

            if self.run_config.dry_run.is_dry_run() {
                self.log_dry_run(&name, group, &executor_config);
                group.set_return_code(SmokeExitCode::OK);
                self.recorder.group_finished(group_id, SmokeExitCode::OK);
                continue;
            }
            if group.tests().is_empty() {
                info!(target: "smoke::driver", "skipping {kind}s, no tests to run");
                continue;
            }

            let return_code = match TestGroupExecutor::new(
                self.executor_context(),
                group,
                group_id,
                executor_config,
            ) {
                Ok(executor) => match executor.execute(group) {
                    Ok(return_code) => return_code,
                    Err(interrupt) => {
                        warn!(target: "smoke::driver", "{interrupt}");
                        interrupted = true;
                        break;
                    }
                },
                Err(error) => {
                    error!(
                        target: "smoke::driver",
                        "encountered an error while creating the executor for {kind}s: {}",
                        DisplayErrorChain::new(&error),
                    );
                    group.set_return_code(SmokeExitCode::INTERNAL_ERROR);
                    self.recorder
                        .group_finished(group_id, SmokeExitCode::INTERNAL_ERROR);
                    SmokeExitCode::INTERNAL_ERROR
                }
            };
            if return_code != SmokeExitCode::OK && self.run_config.fail_fast {
                info!(
                    target: "smoke::driver",
                    "stopping suite {name} after {kind}s failed",
                );
                break;
            }
        }

        if interrupted || self.interrupt.is_interrupted() {
            suite.mark_interrupted();
        }
        let end = suite.record_end();
        self.recorder
            .suite_finished(id, end, suite.return_code(), suite.is_interrupted());
        info!(
            target: "smoke::driver",
            "{}\nSummary of {} suite: {}\n",
            "=".repeat(80),
            suite.name(),
            self.recorder.summarize_suite(id).join("\n"),
        );
    }

    fn log_dry_run(&self, suite: &str, group: &TestGroup, config: &GroupExecutorConfig) {
        let kind = group.test_kind();
        let commands = if group.tests().is_empty() {
            "(no tests)".to_owned()
        } else {
            group
                .tests()
                .iter()
                .map(|test| {
                    make_test_case(kind, test, &config.config, &self.run_config).as_command()
                })
                .join("\n")
        };
        info!(
            target: "smoke::driver",
            "Tests that would be run for {kind}s in suite {suite}:\n{commands}",
        );
    }

    fn executor_context(&self) -> ExecutorContext<'_> {
        ExecutorContext {
            run_config: &self.run_config,
            runtime: &self.runtime,
            interrupt: &self.interrupt,
            recorder: &self.recorder,
            admin: self.admin.clone(),
        }
    }
}

/// Writes the report when dropped, unless [`finish`](Self::finish) already has.
struct ReportGuard<'a> {
    writer: &'a ReportWriter,
    recorder: &'a RunRecorder,
    finished: bool,
}

impl ReportGuard<'_> {
    fn finish(mut self) -> Result<(), ReportWriteError> {
        self.finished = true;
        self.writer.write(&self.recorder.snapshot())
    }
}

impl Drop for ReportGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(error) = self.writer.write(&self.recorder.snapshot()) {
            warn!(
                target: "smoke::driver",
                "failed to write report: {}",
                DisplayErrorChain::new(&error),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::DryRunMode, test_case::TestKind};
    use camino_tempfile::Utf8TempDir;
    use smoke_metadata::ReportFile;

    #[test]
    fn dry_run_starts_nothing() {
        let temp = Utf8TempDir::new().expect("created temp dir");
        let report_file = temp.path().join("report.json");
        let run_config = RunConfig {
            dry_run: DryRunMode::Tests,
            report_file: Some(report_file.clone()),
            ..RunConfig::default()
        };
        let driver = SuiteDriverBuilder::default()
            .build(run_config, SignalHandlerKind::Noop)
            .expect("built driver");

        let mut suites = vec![Suite::new(
            "core",
            Default::default(),
            vec![
                TestGroup::new(
                    TestKind::UnitTest,
                    vec![temp.path().join("never-created").to_string()],
                ),
                TestGroup::new(TestKind::ScriptTest, Vec::new()),
            ],
        )];
        let outcome = driver.run_all(&mut suites).expect("wrote report");
        assert_eq!(
            outcome,
            RunOutcome {
                exit_code: 0,
                interrupted: false
            }
        );
        let groups = suites[0].groups();
        assert_eq!(groups[0].return_code(), Some(0));
        assert_eq!(groups[1].return_code(), Some(0));

        let report = ReportFile::parse_json(
            &std::fs::read_to_string(&report_file).expect("report written"),
        )
        .expect("parsed report");
        assert_eq!(report.exit_code, Some(0));
        assert_eq!(report.suites[0].return_code, Some(0));
        assert_eq!(report.iter_results().count(), 0, "nothing ran");
    }

    #[test]
    fn ports_are_checked_up_front() {
        let run_config = RunConfig {
            base_port: 65000,
            jobs: std::num::NonZeroUsize::new(64).expect("nonzero"),
            ..RunConfig::default()
        };
        let error = SuiteDriverBuilder::default()
            .build(run_config, SignalHandlerKind::Noop)
            .expect_err("64 jobs don't fit above port 65000");
        assert!(matches!(error, RunnerBuildError::Ports(_)), "{error:?}");
    }
}
