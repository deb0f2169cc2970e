// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test cases: turning a test identifier into a process run against a fixture.
//!
//! Every [`TestKind`] has one [`TestCase`] implementation, built through [`make_test_case`]. A
//! test case is constructed, bound to its job's fixture with [`TestCase::configure`], then run
//! once with [`TestCase::run_test`]. Running a test again needs a fresh instance.

mod embedded;
mod integration;
mod script;
mod server;
mod unit;

pub use embedded::*;
pub use integration::*;
pub use script::*;
pub use server::*;
pub use unit::*;

use crate::{
    config::{OptionsMap, RunConfig},
    errors::{DisplayErrorChain, TestCaseError, TestCaseErrorKind, UnknownTestKindError},
    fixtures::Fixture,
    process::{DEFAULT_STOP_GRACE_PERIOD, ProcessSpec},
    runner::JobIndex,
    signal::InterruptReceiver,
};
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use tracing::{error, info};

/// The kind of a test group. Selects both the [`TestCase`] implementation and how tests are
/// selected.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[serde(rename_all = "kebab-case")]
pub enum TestKind {
    /// A standalone test executable.
    UnitTest,

    /// A test executable that connects to the fixture through `--connectionString`.
    IntegrationTest,

    /// A named suite of the embedded test-suite runner.
    EmbeddedSuite,

    /// A script run by the shell.
    ScriptTest,

    /// The router run in its self-test mode.
    ServerHarness,
}

impl TestKind {
    /// Every test kind, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::UnitTest,
        Self::IntegrationTest,
        Self::EmbeddedSuite,
        Self::ScriptTest,
        Self::ServerHarness,
    ];

    /// The strings accepted for test kinds.
    pub fn variants() -> [&'static str; 5] {
        Self::ALL.map(Self::as_str)
    }

    /// Returns the string used for this kind in suite files and reports.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnitTest => "unit-test",
            Self::IntegrationTest => "integration-test",
            Self::EmbeddedSuite => "embedded-suite",
            Self::ScriptTest => "script-test",
            Self::ServerHarness => "server-harness",
        }
    }
}

impl FromStr for TestKind {
    type Err = UnknownTestKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownTestKindError::new(s))
    }
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `[executor.<kind>.config]` section of a suite file.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct TestCaseConfig {
    /// The executable that runs each test, for kinds where the test isn't itself an executable.
    /// Overridden by the matching command-line flag.
    pub executable: Option<Utf8PathBuf>,

    /// Options passed to each test process.
    pub options: OptionsMap,

    /// Global variables set in the shell before a script runs.
    pub global_vars: OptionsMap,

    /// For script tests: pass the fixture's driver connection URL to the shell.
    pub use_connection_string: bool,
}

/// What a test case knows about its fixture once configured.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FixtureBinding {
    /// The job running the test.
    pub job: JobIndex,

    /// The fixture's port, if it listens on one.
    pub port: Option<u16>,
}

/// State shared by every test case.
#[derive(Clone, Debug)]
pub struct TestCaseCore {
    kind: TestKind,
    name: String,
    binding: Option<FixtureBinding>,
    return_code: Option<i32>,
}

impl TestCaseCore {
    /// Creates the state for a test that hasn't been configured.
    pub fn new(kind: TestKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            binding: None,
            return_code: None,
        }
    }

    /// The kind of the test.
    pub fn kind(&self) -> TestKind {
        self.kind
    }

    /// The test's identifier: a path or a suite name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The last path component of the test's identifier.
    pub fn basename(&self) -> &str {
        Utf8Path::new(&self.name).file_name().unwrap_or(&self.name)
    }

    /// A description for logs, such as `script-test jstests/core/a.js`.
    pub fn description(&self) -> String {
        format!("{} {}", self.kind, self.name)
    }

    /// The fixture this test was configured against, if any.
    pub fn binding(&self) -> Option<FixtureBinding> {
        self.binding
    }

    /// The exit code of the test process, once it has run.
    pub fn return_code(&self) -> Option<i32> {
        self.return_code
    }

    /// Records the fixture this test runs against.
    pub fn bind(&mut self, fixture: &dyn Fixture) -> FixtureBinding {
        let binding = FixtureBinding {
            job: fixture.job_index(),
            port: fixture.port(),
        };
        self.binding = Some(binding);
        binding
    }

    fn require_binding(&self) -> FixtureBinding {
        match self.binding {
            Some(binding) => binding,
            None => panic!("run_test() called on {} before configure()", self.description()),
        }
    }

    pub(crate) fn io_error(&self, context: &str, error: std::io::Error) -> TestCaseError {
        TestCaseError::Io {
            description: self.description(),
            context: context.to_owned(),
            error,
        }
    }
}

/// A test to run against a fixture.
#[async_trait]
pub trait TestCase: fmt::Debug + Send + Sync {
    /// The state shared by every test case.
    fn core(&self) -> &TestCaseCore;

    /// The state shared by every test case, mutably.
    fn core_mut(&mut self) -> &mut TestCaseCore;

    /// Binds this test to its job's fixture, deriving ports, data directories and connection
    /// strings. Implementations call [`TestCaseCore::bind`].
    fn configure(&mut self, fixture: &dyn Fixture) -> Result<(), TestCaseError>;

    /// The process that runs this test, given what `configure` derived.
    fn make_process(&self) -> ProcessSpec;

    /// The command line that runs (or would run) this test.
    fn as_command(&self) -> String {
        self.make_process().as_command()
    }

    /// Runs the test to completion.
    ///
    /// A nonzero exit is reported as [`TestCaseError::Failed`]. If the run is interrupted while
    /// the process is running, the process is stopped and [`TestCaseError::Interrupted`] is
    /// returned.
    ///
    /// # Panics
    ///
    /// Panics if the test hasn't been configured, or has already run.
    async fn run_test(&mut self, interrupt: &mut InterruptReceiver) -> Result<(), TestCaseError> {
        let core = self.core();
        let binding = core.require_binding();
        assert!(
            core.return_code.is_none(),
            "run_test() called twice on {}",
            core.description()
        );
        let description = core.description();

        let spec = self.make_process();
        let result = execute(&spec, &description, binding.job, interrupt).await;
        let result = match result {
            Ok(exit_code) => {
                self.core_mut().return_code = Some(exit_code);
                if exit_code == 0 {
                    info!(target: "smoke::tests", job = binding.job.get(), "{description} finished");
                    Ok(())
                } else {
                    Err(TestCaseError::Failed {
                        description,
                        exit_code,
                    })
                }
            }
            Err(error) => Err(error),
        };

        if let Err(error) = &result {
            if error.kind() == TestCaseErrorKind::Infrastructure {
                error!(
                    target: "smoke::tests",
                    job = binding.job.get(),
                    "encountered an error running {}: {}",
                    self.core().basename(),
                    DisplayErrorChain::new(error),
                );
            }
        }
        result
    }
}

/// Starts `spec` and waits for it, racing the interrupt.
async fn execute(
    spec: &ProcessSpec,
    description: &str,
    job: JobIndex,
    interrupt: &mut InterruptReceiver,
) -> Result<i32, TestCaseError> {
    info!(
        target: "smoke::tests",
        job = job.get(),
        "starting {description}...\n{}",
        spec.as_command(),
    );
    let mut process = spec.start().map_err(|error| TestCaseError::Spawn {
        description: description.to_owned(),
        error,
    })?;
    info!(
        target: "smoke::tests",
        job = job.get(),
        pid = process.pid(),
        "{description} started with pid {}",
        process.pid(),
    );

    let io_error = |context: &str, error| TestCaseError::Io {
        description: description.to_owned(),
        context: context.to_owned(),
        error,
    };
    tokio::select! {
        exit_code = process.wait() => {
            exit_code.map_err(|error| io_error("failed to wait for process", error))
        }
        event = interrupt.interrupted() => {
            info!(
                target: "smoke::tests",
                job = job.get(),
                "stopping {description} after {event}",
            );
            process
                .stop(DEFAULT_STOP_GRACE_PERIOD)
                .await
                .map_err(|error| io_error("failed to stop process", error))?;
            Err(TestCaseError::Interrupted {
                description: description.to_owned(),
            })
        }
    }
}

/// Constructs the test case for one test of a group.
///
/// Executables named on the command line win over the suite's `executable`, which wins over the
/// built-in default.
pub fn make_test_case(
    kind: TestKind,
    name: &str,
    config: &TestCaseConfig,
    run_config: &RunConfig,
) -> Box<dyn TestCase> {
    match kind {
        TestKind::UnitTest => Box::new(UnitTestCase::new(name, config)),
        TestKind::IntegrationTest => Box::new(IntegrationTestCase::new(name, config)),
        TestKind::EmbeddedSuite => Box::new(EmbeddedSuiteCase::new(name, config, run_config)),
        TestKind::ScriptTest => Box::new(ScriptTestCase::new(name, config, run_config)),
        TestKind::ServerHarness => Box::new(ServerHarnessCase::new(name, config)),
    }
}
