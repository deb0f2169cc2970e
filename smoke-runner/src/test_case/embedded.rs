// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{TestCase, TestCaseConfig, TestCaseCore, TestKind};
use crate::{
    config::{EMBEDDED_SUBDIR, LayeredOptions, OptionsMap, RunConfig, default_executables},
    errors::TestCaseError,
    fixtures::{Fixture, STORAGE_ENGINE},
    helpers::recreate_dir,
    process::ProcessSpec,
    programs::embedded_suite_program,
};
use camino::{Utf8Path, Utf8PathBuf};
use serde_json::Value;

/// Environment variables consulted, in order, for the embedded-suite data directory prefix.
pub const TEMP_DIR_VARS: [&str; 3] = ["TMPDIR", "TEMP", "TMP"];

/// The data directory prefix used when nothing else specifies one.
pub const FALLBACK_TEMP_DIR: &str = "/tmp";

/// A named suite run by the embedded test-suite runner.
///
/// Each suite gets an empty data directory, `<prefix>/job<N>/unittest`, at configure time.
#[derive(Clone, Debug)]
pub struct EmbeddedSuiteCase {
    core: TestCaseCore,
    executable: Utf8PathBuf,
    options: OptionsMap,
    dbpath_prefix: Utf8PathBuf,
}

impl EmbeddedSuiteCase {
    /// Creates a new embedded suite test, reading temp-dir variables from the process
    /// environment.
    pub fn new(suite: &str, config: &TestCaseConfig, run_config: &RunConfig) -> Self {
        Self::with_env(suite, config, run_config, |var| std::env::var(var).ok())
    }

    /// Creates a new embedded suite test, reading temp-dir variables through `env`.
    pub fn with_env(
        suite: &str,
        config: &TestCaseConfig,
        run_config: &RunConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let mut options = LayeredOptions::new(OptionsMap::new())
            .suite(&config.options)
            .command_line(
                STORAGE_ENGINE,
                run_config.storage_engine.as_deref().map(Into::into),
            )
            .merge();
        let suite_prefix = match options.shift_remove("dbpath") {
            Some(Value::String(dbpath)) => Some(dbpath),
            _ => None,
        };
        let dbpath_prefix =
            embedded_dbpath_prefix(run_config.dbpath_prefix.as_deref(), suite_prefix, env);

        let executable = run_config
            .executables
            .embedded_runner
            .clone()
            .or_else(|| config.executable.clone())
            .unwrap_or_else(|| default_executables::EMBEDDED_RUNNER.into());

        Self {
            core: TestCaseCore::new(TestKind::EmbeddedSuite, suite),
            executable,
            options,
            dbpath_prefix,
        }
    }
}

/// Resolves the data directory prefix of embedded suites.
///
/// The command line wins, then a `dbpath` in the suite's options, then the first set variable of
/// [`TEMP_DIR_VARS`], then [`FALLBACK_TEMP_DIR`].
pub fn embedded_dbpath_prefix(
    cli: Option<&Utf8Path>,
    suite: Option<String>,
    env: impl Fn(&str) -> Option<String>,
) -> Utf8PathBuf {
    if let Some(cli) = cli {
        return cli.to_owned();
    }
    suite
        .or_else(|| TEMP_DIR_VARS.into_iter().find_map(env))
        .map_or_else(|| FALLBACK_TEMP_DIR.into(), Utf8PathBuf::from)
}

impl TestCase for EmbeddedSuiteCase {
    fn core(&self) -> &TestCaseCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TestCaseCore {
        &mut self.core
    }

    fn configure(&mut self, fixture: &dyn Fixture) -> Result<(), TestCaseError> {
        let binding = self.core.bind(fixture);
        let dbpath = self
            .dbpath_prefix
            .join(binding.job.dir_name())
            .join(EMBEDDED_SUBDIR);
        recreate_dir(&dbpath)
            .map_err(|error| self.core.io_error("failed to recreate data directory", error))?;
        self.options
            .insert("dbpath".to_owned(), dbpath.as_str().into());
        Ok(())
    }

    fn make_process(&self) -> ProcessSpec {
        embedded_suite_program(&self.executable, &[self.core.name()], &self.options)
    }
}
