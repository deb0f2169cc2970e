// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by smoke.

use crate::{runner::JobIndex, signal::ShutdownEvent, test_case::TestKind};
use camino::Utf8PathBuf;
use config::ConfigError;
use std::{fmt, io};
use thiserror::Error;

/// An error that occurred while loading a suite file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoadSuiteError {
    /// The suite file could not be found.
    #[error("suite `{name}` not found (looked for `{path}`)")]
    NotFound {
        /// The name of the suite.
        name: String,

        /// The path that was checked.
        path: Utf8PathBuf,
    },

    /// The suite file could not be parsed.
    #[error("failed to parse suite file `{path}`")]
    Parse {
        /// The path to the suite file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: ConfigError,
    },

    /// Tests for the suite could not be selected.
    #[error("failed to select tests for suite `{name}`")]
    Select {
        /// The name of the suite.
        name: String,

        /// The underlying error.
        #[source]
        error: SelectorError,
    },

    /// The suites directory could not be read.
    #[error("failed to read suites directory `{path}`")]
    ReadDir {
        /// The suites directory.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },
}

/// An error that occurred while selecting the tests of a test group.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SelectorError {
    /// A root or exclusion pattern was not a valid glob.
    #[error("invalid glob `{glob}` for {test_kind}s")]
    InvalidGlob {
        /// The test kind being selected.
        test_kind: TestKind,

        /// The glob.
        glob: String,

        /// The underlying error.
        #[source]
        error: globset::Error,
    },

    /// A list file naming test executables could not be read.
    #[error("failed to read list file `{path}`")]
    ListFile {
        /// The path to the list file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// An error occurred while walking the directory tree for glob matches.
    #[error("failed to walk `{path}` for test files")]
    Walk {
        /// The directory being walked.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: walkdir::Error,
    },

    /// The embedded-suite runner could not list its suites.
    #[error("failed to list suites with `{executable} --list`")]
    ListSuites {
        /// The runner executable.
        executable: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },
}

/// A string did not name a known test kind.
#[derive(Clone, Debug, Error)]
#[error("unknown test kind `{input}` (known kinds: {})", TestKind::variants().join(", "))]
pub struct UnknownTestKindError {
    input: String,
}

impl UnknownTestKindError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// An error that occurred while allocating ports.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum PortAllocationError {
    /// The requested jobs do not fit in the port space above the base port.
    #[error(
        "base port {base_port} leaves no room for {job_count} jobs of {ports_per_job} ports each"
    )]
    PortSpaceExhausted {
        /// The base port.
        base_port: u16,

        /// The number of jobs.
        job_count: usize,

        /// The number of ports reserved for each job.
        ports_per_job: u16,
    },

    /// A job index past the configured number of jobs was requested.
    #[error("{job} is out of range for {job_count} jobs")]
    JobOutOfRange {
        /// The job index.
        job: JobIndex,

        /// The number of jobs.
        job_count: usize,
    },

    /// A job's fixtures used up all the ports reserved for them.
    #[error("{job} has used all {available} of its fixture ports")]
    FixturePortsExhausted {
        /// The job index.
        job: JobIndex,

        /// The number of fixture ports each job has.
        available: u16,
    },
}

/// An error that occurred while spawning a process.
#[derive(Debug, Error)]
#[error("failed to spawn `{command}`")]
pub struct SpawnError {
    command: String,
    #[source]
    error: io::Error,
}

impl SpawnError {
    pub(crate) fn new(command: String, error: io::Error) -> Self {
        Self { command, error }
    }

    /// Returns the command line that failed to spawn.
    pub fn command(&self) -> &str {
        &self.command
    }
}

/// An error returned by an [`AdminClient`](crate::fixtures::AdminClient).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AdminError {
    /// The server could not be reached. Errors of this kind are retried by the quorum-wait
    /// primitive.
    #[error("could not connect to server on port {port}: {reason}")]
    Connection {
        /// The port that was contacted.
        port: u16,

        /// A description of what went wrong.
        reason: String,
    },

    /// The server was reached, but the command failed.
    #[error("`{command}` failed on port {port}")]
    CommandFailed {
        /// The port that was contacted.
        port: u16,

        /// The command that was issued.
        command: String,
    },

    /// A replicated write did not reach the requested number of nodes in time.
    #[error("replicated write on port {port} timed out waiting for {nodes} nodes")]
    WriteTimeout {
        /// The port that was contacted.
        port: u16,

        /// The number of nodes the write was waiting for.
        nodes: usize,
    },

    /// The admin shell could not be started.
    #[error("failed to run admin command on port {port}")]
    Spawn {
        /// The port that was contacted.
        port: u16,

        /// The underlying error.
        #[source]
        error: SpawnError,
    },
}

impl AdminError {
    /// Returns true if this is a connectivity failure.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

/// An error that occurred while managing a fixture.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FixtureError {
    /// A server process failed to start, exited early, or could not be reached in time.
    #[error("{message}")]
    ServerFailure {
        /// A description of the failure.
        message: String,
    },

    /// The requested role does not exist in this fixture (for example, asking for the primary
    /// of a replica set that hasn't been set up yet).
    #[error("{fixture} has no {role}")]
    NotApplicable {
        /// A description of the fixture.
        fixture: String,

        /// The role that was requested.
        role: &'static str,
    },

    /// The fixture's options are inconsistent.
    #[error("invalid options for {fixture} fixture: {message}")]
    InvalidOptions {
        /// The fixture class.
        fixture: &'static str,

        /// A description of the problem.
        message: String,
    },

    /// A server process could not be spawned.
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    /// An I/O error occurred.
    #[error("{context}")]
    Io {
        /// What was being done.
        context: String,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// No port could be allocated for a server process.
    #[error(transparent)]
    Ports(#[from] PortAllocationError),

    /// An administrative command failed.
    #[error(transparent)]
    Admin(#[from] AdminError),
}

impl FixtureError {
    pub(crate) fn server_failure(message: impl Into<String>) -> Self {
        Self::ServerFailure {
            message: message.into(),
        }
    }
}

/// The category of a [`TestCaseError`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TestCaseErrorKind {
    /// The test ran and exited with a nonzero code.
    Failure,

    /// The harness could not run the test.
    Infrastructure,

    /// The test was stopped because the run was interrupted.
    Interrupt,
}

/// An error that occurred while configuring or running a test case.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TestCaseError {
    /// The test process exited with a nonzero code.
    #[error("{description} failed with exit code {exit_code}")]
    Failed {
        /// A description of the test.
        description: String,

        /// The exit code.
        exit_code: i32,
    },

    /// The run was interrupted while the test was running.
    #[error("{description} was interrupted")]
    Interrupted {
        /// A description of the test.
        description: String,
    },

    /// The fixture could not provide what the test needs.
    #[error("fixture error while configuring {description}")]
    Infrastructure {
        /// A description of the test.
        description: String,

        /// The underlying error.
        #[source]
        error: FixtureError,
    },

    /// The test process could not be spawned.
    #[error("failed to start {description}")]
    Spawn {
        /// A description of the test.
        description: String,

        /// The underlying error.
        #[source]
        error: SpawnError,
    },

    /// An I/O error occurred.
    #[error("{context} for {description}")]
    Io {
        /// A description of the test.
        description: String,

        /// What was being done.
        context: String,

        /// The underlying error.
        #[source]
        error: io::Error,
    },
}

impl TestCaseError {
    /// Returns the category of this error.
    pub fn kind(&self) -> TestCaseErrorKind {
        match self {
            Self::Failed { .. } => TestCaseErrorKind::Failure,
            Self::Interrupted { .. } => TestCaseErrorKind::Interrupt,
            Self::Infrastructure { .. } | Self::Spawn { .. } | Self::Io { .. } => {
                TestCaseErrorKind::Infrastructure
            }
        }
    }
}

/// Returned when a run was interrupted by the user or by the CI timeout signal.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("received {event} from user")]
pub struct UserInterrupt {
    event: ShutdownEvent,
}

impl UserInterrupt {
    pub(crate) fn new(event: ShutdownEvent) -> Self {
        Self { event }
    }

    /// The event that caused the interrupt.
    pub fn event(&self) -> ShutdownEvent {
        self.event
    }
}

/// An error that prevented a test group from starting its jobs.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecutorError {
    /// A job's fixture could not be constructed.
    #[error("failed to create fixture for {job}")]
    FixtureCreate {
        /// The job.
        job: JobIndex,

        /// The underlying error.
        #[source]
        error: FixtureError,
    },

    /// A job's ports could not be allocated.
    #[error(transparent)]
    Ports(#[from] PortAllocationError),
}

/// An error that occurred while building a [`SuiteDriver`](crate::runner::SuiteDriver).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunnerBuildError {
    /// An error occurred while creating the Tokio runtime.
    #[error("error creating Tokio runtime")]
    TokioRuntimeCreate(#[source] io::Error),

    /// An error occurred while setting up signals.
    #[error("error setting up signals")]
    SignalHandlerSetupError(#[from] SignalHandlerSetupError),

    /// The configured jobs do not fit in the port space.
    #[error(transparent)]
    Ports(#[from] PortAllocationError),
}

/// An error occurred while setting up the signal handler.
#[derive(Debug, Error)]
#[error("error setting up signal handler")]
pub struct SignalHandlerSetupError(#[from] io::Error);

/// An error that occurred while writing a report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReportWriteError {
    /// The report could not be serialized.
    #[error("error serializing report")]
    Serialize(#[source] serde_json::Error),

    /// The directory containing a report could not be created.
    #[error("error creating directory `{path}`")]
    CreateDir {
        /// The directory.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The JSON report could not be written.
    #[error("error writing report to `{path}`")]
    Json {
        /// The report path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: atomicwrites::Error<io::Error>,
    },

    /// The JUnit report could not be written.
    #[error("error writing JUnit report to `{path}`")]
    Junit {
        /// The report path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: atomicwrites::Error<quick_junit::SerializeError>,
    },
}

/// A fixture class string was not recognized.
#[derive(Clone, Debug, Error)]
#[error("unknown fixture class `{input}`")]
pub struct UnknownFixtureClassError {
    input: String,
}

impl UnknownFixtureClassError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// Displays an error along with its chain of sources, separated by `: `.
pub struct DisplayErrorChain<E>(E);

impl<E: std::error::Error> DisplayErrorChain<E> {
    /// Creates a new `DisplayErrorChain`.
    pub fn new(error: E) -> Self {
        Self(error)
    }
}

impl<E: std::error::Error> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(error) = source {
            write!(f, ": {error}")?;
            source = error.source();
        }
        Ok(())
    }
}
