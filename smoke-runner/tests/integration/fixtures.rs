// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use color_eyre::eyre::Result;
use smoke_metadata::ReportFile;
use smoke_runner::{
    config::{ExecutableOverrides, RunConfig},
    runner::{Suite, TestGroup},
    test_case::TestKind,
};
use std::{num::NonZeroUsize, sync::Once};

/// Runs the last argument with `/bin/sh`, the way the real shell runs a script file.
pub(crate) const FAKE_SHELL: &str = r#"for last; do :; done
exec /bin/sh "$last""#;

/// A script that runs until it gets SIGTERM.
pub(crate) const SLOW_SCRIPT: &str = "trap 'exit 0' TERM\nwhile :; do sleep 0.1; done";

pub(crate) fn test_init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = color_eyre::install();
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

/// A scratch directory holding test scripts, data directories and reports.
#[derive(Debug)]
pub(crate) struct Workspace {
    temp: Utf8TempDir,
}

impl Workspace {
    pub(crate) fn new() -> Result<Self> {
        let temp = Utf8TempDir::new()?;
        std::fs::create_dir(temp.path().join("jstests"))?;
        Ok(Self { temp })
    }

    pub(crate) fn path(&self) -> &Utf8Path {
        self.temp.path()
    }

    pub(crate) fn report_file(&self) -> Utf8PathBuf {
        self.path().join("report.json")
    }

    pub(crate) fn junit_file(&self) -> Utf8PathBuf {
        self.path().join("junit/report.xml")
    }

    /// Writes a script test and returns its path.
    pub(crate) fn script_test(&self, name: &str, body: &str) -> Result<String> {
        let path = self.path().join("jstests").join(name);
        std::fs::write(&path, format!("{body}\n"))?;
        Ok(path.into_string())
    }

    /// A run configuration using the fake shell, with data and reports kept in this workspace.
    pub(crate) fn run_config(&self, jobs: usize) -> Result<RunConfig> {
        let shell = self.path().join("fake-shell");
        write_executable(&shell, FAKE_SHELL)?;
        Ok(RunConfig {
            jobs: NonZeroUsize::new(jobs).unwrap_or(NonZeroUsize::MIN),
            dbpath_prefix: Some(self.path().join("db")),
            report_file: Some(self.report_file()),
            executables: ExecutableOverrides {
                shell: Some(shell),
                ..ExecutableOverrides::default()
            },
            ..RunConfig::default()
        })
    }

    pub(crate) fn read_report(&self) -> Result<ReportFile> {
        let json = std::fs::read_to_string(self.report_file())?;
        Ok(ReportFile::parse_json(&json)?)
    }
}

/// A suite with a single group of script tests and a no-op fixture.
pub(crate) fn script_suite(name: &str, tests: Vec<String>) -> Suite {
    Suite::new(
        name,
        Default::default(),
        vec![TestGroup::new(TestKind::ScriptTest, tests)],
    )
}

fn write_executable(path: &Utf8Path, body: &str) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::write(path, format!("#!/bin/sh\n{body}\n"))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

