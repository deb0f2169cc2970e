// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::network::DEFAULT_BASE_PORT;
use camino::{Utf8Path, Utf8PathBuf};
use std::{fmt, num::NonZeroUsize, str::FromStr};

/// The prefix under which fixtures and script tests create their data directories, if neither
/// the command line nor the suite file specifies one.
pub const DEFAULT_DBPATH_PREFIX: &str = "/data/db";

/// The subdirectory of `<prefix>/job<N>` used by fixtures.
pub const FIXTURE_SUBDIR: &str = "smoke";

/// The subdirectory of `<prefix>/job<N>` used as the data directory of script tests.
pub const SCRIPT_SUBDIR: &str = "mongorunner";

/// The subdirectory of `<prefix>/job<N>` used by embedded suites.
pub const EMBEDDED_SUBDIR: &str = "unittest";

/// Overridable settings for a run, as a snapshot taken once at startup.
///
/// A `RunConfig` is built by the command-line driver and passed by reference to everything that
/// needs it. Nothing mutates it after construction.
#[derive(Clone, Debug)]
pub struct RunConfig {
    /// The number of jobs (lanes) to run each test group with.
    pub jobs: NonZeroUsize,

    /// The number of times to execute each test group.
    pub repeat: NonZeroUsize,

    /// Whether to shuffle the tests of each group before partitioning them.
    pub shuffle: bool,

    /// The seed used for shuffling.
    pub seed: u64,

    /// Whether to stop after the first failing test.
    pub fail_fast: bool,

    /// Whether this is a dry run.
    pub dry_run: DryRunMode,

    /// The first port of the port range handed out to jobs.
    pub base_port: u16,

    /// Overrides the prefix of every data directory.
    pub dbpath_prefix: Option<Utf8PathBuf>,

    /// Overrides the storage engine of every server, and is passed to scripts as
    /// `TestData.storageEngine`.
    pub storage_engine: Option<String>,

    /// Overrides for the executables used by fixtures and test cases.
    pub executables: ExecutableOverrides,

    /// Where to write the JSON report, if anywhere.
    pub report_file: Option<Utf8PathBuf>,

    /// Where to write a JUnit report, if anywhere.
    pub junit_file: Option<Utf8PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            jobs: NonZeroUsize::MIN,
            repeat: NonZeroUsize::MIN,
            shuffle: false,
            seed: 0,
            fail_fast: true,
            dry_run: DryRunMode::Off,
            base_port: DEFAULT_BASE_PORT,
            dbpath_prefix: None,
            storage_engine: None,
            executables: ExecutableOverrides::default(),
            report_file: None,
            junit_file: None,
        }
    }
}

impl RunConfig {
    /// Resolves the data directory prefix for fixtures and script tests: the command line wins
    /// over the suite file, which wins over [`DEFAULT_DBPATH_PREFIX`].
    pub fn dbpath_prefix_or<'a>(&'a self, suite_value: Option<&'a Utf8Path>) -> &'a Utf8Path {
        self.dbpath_prefix
            .as_deref()
            .or(suite_value)
            .unwrap_or_else(|| Utf8Path::new(DEFAULT_DBPATH_PREFIX))
    }
}

/// Executables specified on the command line, which take precedence over suite files.
#[derive(Clone, Debug, Default)]
pub struct ExecutableOverrides {
    /// The script interpreter (shell).
    pub shell: Option<Utf8PathBuf>,

    /// The database server.
    pub server: Option<Utf8PathBuf>,

    /// The sharding router.
    pub router: Option<Utf8PathBuf>,

    /// The embedded test-suite runner.
    pub embedded_runner: Option<Utf8PathBuf>,
}

/// Default executable names, resolved through `PATH`.
pub mod default_executables {
    /// The script interpreter.
    pub const SHELL: &str = "mongo";

    /// The database server.
    pub const SERVER: &str = "mongod";

    /// The sharding router.
    pub const ROUTER: &str = "mongos";

    /// The embedded test-suite runner.
    pub const EMBEDDED_RUNNER: &str = "dbtest";
}

/// Whether a run is a dry run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DryRunMode {
    /// Execute tests normally.
    #[default]
    Off,

    /// List the tests (and their command lines) that would run, without starting anything.
    Tests,
}

impl DryRunMode {
    /// Returns true if tests should not be executed.
    pub fn is_dry_run(self) -> bool {
        matches!(self, Self::Tests)
    }
}

impl FromStr for DryRunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(Self::Off),
            "tests" => Ok(Self::Tests),
            other => Err(format!("unknown dry-run mode `{other}` (expected `off` or `tests`)")),
        }
    }
}

impl fmt::Display for DryRunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Tests => write!(f, "tests"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Some("/cli"), Some("/suite"), "/cli"; "command line wins")]
    #[test_case(None, Some("/suite"), "/suite"; "suite value used")]
    #[test_case(None, None, DEFAULT_DBPATH_PREFIX; "default")]
    fn dbpath_prefix_precedence(cli: Option<&str>, suite: Option<&str>, expected: &str) {
        let config = RunConfig {
            dbpath_prefix: cli.map(Utf8PathBuf::from),
            ..RunConfig::default()
        };
        assert_eq!(config.dbpath_prefix_or(suite.map(Utf8Path::new)), expected);
    }

    #[test]
    fn dry_run_mode_parse() {
        assert_eq!("tests".parse::<DryRunMode>(), Ok(DryRunMode::Tests));
        assert_eq!("off".parse::<DryRunMode>(), Ok(DryRunMode::Off));
        assert!("everything".parse::<DryRunMode>().is_err());
    }
}
