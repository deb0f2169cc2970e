// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    ExpectedError,
    output::{OutputContext, OutputOpts, clap_styles},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand, ValueEnum};
use smoke_runner::{
    config::{
        DryRunMode, ExecutableOverrides, RunConfig, SelectContext, SuiteLoader,
        default_executables,
    },
    network::DEFAULT_BASE_PORT,
    runner::{Suite, SuiteDriverBuilder},
    signal::SignalHandlerKind,
};
use std::{
    io::{self, Write},
    num::NonZeroUsize,
};
use tracing::info;

type Result<T, E = ExpectedError> = std::result::Result<T, E>;

/// Runs suites of tests against database server fixtures.
#[derive(Debug, Parser)]
#[command(version, name = "smoke", styles = clap_styles::style())]
pub struct SmokeApp {
    #[command(flatten)]
    output: OutputOpts,

    /// Directory containing suite files
    #[arg(
        long,
        global = true,
        value_name = "DIR",
        default_value = "suites",
        env = "SMOKE_SUITES_DIR"
    )]
    suites_dir: Utf8PathBuf,

    #[command(subcommand)]
    command: Command,
}

impl SmokeApp {
    /// Initializes logging and color output. Call this once, before [`Self::exec`].
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app, returning the process exit code.
    pub fn exec(self, output: OutputContext) -> Result<i32> {
        let loader = SuiteLoader::new(self.suites_dir);
        match self.command {
            Command::Run(opts) => opts.exec(&loader, output),
            Command::ListSuites => {
                let names = loader
                    .list()
                    .map_err(|err| ExpectedError::ListSuites { err })?;
                let mut stdout = io::stdout().lock();
                for name in names {
                    writeln!(stdout, "{name}").map_err(|err| ExpectedError::WriteOutput { err })?;
                }
                Ok(0)
            }
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one or more suites
    ///
    /// Each suite is loaded from `<suites-dir>/<name>.toml` (or from a path ending in `.toml`),
    /// its tests are selected, and each of its test groups runs across `--jobs` fixtures.
    Run(RunOpts),

    /// List the suites in the suites directory
    ListSuites,
}

#[derive(Debug, Args)]
struct RunOpts {
    /// Suites to run, by name or path
    #[arg(required = true, value_name = "SUITES")]
    suites: Vec<String>,

    /// Number of jobs (fixtures) to run each test group with
    #[arg(long, short = 'j', value_name = "N", env = "SMOKE_JOBS", help_heading = "RUN OPTIONS")]
    jobs: Option<NonZeroUsize>,

    /// Number of times to run each test group
    #[arg(long, value_name = "N", help_heading = "RUN OPTIONS")]
    repeat: Option<NonZeroUsize>,

    /// Shuffle the tests of each group
    #[arg(long, help_heading = "RUN OPTIONS")]
    shuffle: bool,

    /// Seed for --shuffle [default: derived from the current time]
    #[arg(long, value_name = "SEED", requires = "shuffle", help_heading = "RUN OPTIONS")]
    seed: Option<u64>,

    /// Keep running after a test fails
    #[arg(long, help_heading = "RUN OPTIONS")]
    continue_on_failure: bool,

    /// Print the tests that would run without starting anything
    #[arg(
        long,
        value_enum,
        value_name = "MODE",
        num_args = 0..=1,
        default_missing_value = "tests",
        help_heading = "RUN OPTIONS"
    )]
    dry_run: Option<DryRunOpt>,

    /// Directory that test roots in suite files are relative to
    #[arg(long, value_name = "DIR", default_value = ".", help_heading = "RUN OPTIONS")]
    root_dir: Utf8PathBuf,

    /// First port of the range handed out to jobs
    #[arg(
        long,
        value_name = "PORT",
        default_value_t = DEFAULT_BASE_PORT,
        env = "SMOKE_BASE_PORT",
        help_heading = "FIXTURE OPTIONS"
    )]
    base_port: u16,

    /// Prefix of every data directory
    #[arg(long, value_name = "DIR", help_heading = "FIXTURE OPTIONS")]
    dbpath_prefix: Option<Utf8PathBuf>,

    /// Storage engine for every server
    #[arg(long, value_name = "NAME", help_heading = "FIXTURE OPTIONS")]
    storage_engine: Option<String>,

    /// Script interpreter
    #[arg(long, value_name = "PATH", help_heading = "EXECUTABLES")]
    shell: Option<Utf8PathBuf>,

    /// Database server
    #[arg(long, value_name = "PATH", help_heading = "EXECUTABLES")]
    server: Option<Utf8PathBuf>,

    /// Sharding router
    #[arg(long, value_name = "PATH", help_heading = "EXECUTABLES")]
    router: Option<Utf8PathBuf>,

    /// Embedded test-suite runner
    #[arg(long, value_name = "PATH", help_heading = "EXECUTABLES")]
    embedded_runner: Option<Utf8PathBuf>,

    /// Write a JSON report to this path
    #[arg(long, value_name = "PATH", help_heading = "REPORT OPTIONS")]
    report_file: Option<Utf8PathBuf>,

    /// Write a JUnit report to this path
    #[arg(long, value_name = "PATH", help_heading = "REPORT OPTIONS")]
    junit_file: Option<Utf8PathBuf>,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum DryRunOpt {
    #[default]
    Off,
    Tests,
}

impl From<DryRunOpt> for DryRunMode {
    fn from(opt: DryRunOpt) -> Self {
        match opt {
            DryRunOpt::Off => DryRunMode::Off,
            DryRunOpt::Tests => DryRunMode::Tests,
        }
    }
}

impl RunOpts {
    fn exec(self, loader: &SuiteLoader, output: OutputContext) -> Result<i32> {
        let run_config = self.to_run_config();
        if run_config.shuffle {
            info!("shuffling tests with seed {}", run_config.seed);
        }
        if output.verbose {
            info!(
                "running with {} job(s), repeat {}",
                run_config.jobs, run_config.repeat
            );
        }

        let mut suites = self.load_suites(loader, &run_config)?;
        let num_tests: usize = suites.iter().map(Suite::num_tests).sum();
        info!(
            "loaded {} {} across {} suite(s)",
            num_tests,
            if num_tests == 1 { "test" } else { "tests" },
            suites.len()
        );

        let driver = SuiteDriverBuilder::default().build(run_config, SignalHandlerKind::Standard)?;
        let outcome = driver.run_all(&mut suites)?;
        Ok(outcome.exit_code)
    }

    fn load_suites(&self, loader: &SuiteLoader, run_config: &RunConfig) -> Result<Vec<Suite>> {
        let executables = &run_config.executables;
        let embedded_runner = executables
            .embedded_runner
            .as_deref()
            .unwrap_or_else(|| Utf8Path::new(default_executables::EMBEDDED_RUNNER));
        let router = executables
            .router
            .as_deref()
            .unwrap_or_else(|| Utf8Path::new(default_executables::ROUTER));
        let cx = SelectContext {
            root_dir: &self.root_dir,
            embedded_runner,
            router,
        };

        self.suites
            .iter()
            .map(|name| -> Result<Suite> {
                let config = loader.load(name)?;
                Ok(Suite::from_config(name.clone(), config, &cx)?)
            })
            .collect()
    }

    fn to_run_config(&self) -> RunConfig {
        let defaults = RunConfig::default();
        let seed = match (self.shuffle, self.seed) {
            (_, Some(seed)) => seed,
            (true, None) => time_seed(),
            (false, None) => defaults.seed,
        };
        RunConfig {
            jobs: self.jobs.unwrap_or(defaults.jobs),
            repeat: self.repeat.unwrap_or(defaults.repeat),
            shuffle: self.shuffle,
            seed,
            fail_fast: !self.continue_on_failure,
            dry_run: self.dry_run.unwrap_or_default().into(),
            base_port: self.base_port,
            dbpath_prefix: self.dbpath_prefix.clone(),
            storage_engine: self.storage_engine.clone(),
            executables: ExecutableOverrides {
                shell: self.shell.clone(),
                server: self.server.clone(),
                router: self.router.clone(),
                embedded_runner: self.embedded_runner.clone(),
            },
            report_file: self.report_file.clone(),
            junit_file: self.junit_file.clone(),
        }
    }
}

fn time_seed() -> u64 {
    chrono::Utc::now().timestamp_micros().unsigned_abs()
}
