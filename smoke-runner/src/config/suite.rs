// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::SelectorConfig;
use crate::{
    errors::LoadSuiteError, fixtures::FixtureConfig, test_case::TestCaseConfig,
    test_case::TestKind,
};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigError, File, FileFormat};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// The file extension of suite files.
pub const SUITE_FILE_EXTENSION: &str = "toml";

/// The contents of a suite file.
///
/// ```toml
/// [selector.script-test]
/// roots = ["jstests/core/*.js"]
///
/// [executor.script-test.config]
/// options = { nodb = "" }
///
/// [executor.script-test.fixture]
/// class = "replica-set"
/// num-nodes = 3
/// ```
///
/// Every test kind with a `selector` section becomes a test group, in the order the sections
/// appear in the file.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct SuiteConfig {
    /// How to select the tests of each group.
    #[serde(default)]
    pub selector: IndexMap<TestKind, SelectorConfig>,

    /// How to execute the tests of each group.
    #[serde(default)]
    pub executor: IndexMap<TestKind, GroupExecutorConfig>,
}

/// The `[executor.<kind>]` section of a suite file.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct GroupExecutorConfig {
    /// Options passed to each test case.
    #[serde(default)]
    pub config: TestCaseConfig,

    /// The fixture each job sets up.
    #[serde(default)]
    pub fixture: FixtureConfig,
}

impl SuiteConfig {
    /// Parses a suite file from a TOML string.
    pub fn parse_toml(toml: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    /// Loads a suite file from disk.
    pub fn load(path: &Utf8Path) -> Result<Self, LoadSuiteError> {
        Config::builder()
            .add_source(File::new(path.as_str(), FileFormat::Toml))
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|error| LoadSuiteError::Parse {
                path: path.to_owned(),
                error,
            })
    }

    /// Returns the test kinds that make up this suite, in file order.
    pub fn test_kinds(&self) -> impl Iterator<Item = TestKind> + '_ {
        self.selector.keys().copied()
    }

    /// Returns the executor configuration for a test kind, or the default (no options, no-op
    /// fixture) if the suite doesn't specify one.
    pub fn executor_config(&self, kind: TestKind) -> GroupExecutorConfig {
        self.executor.get(&kind).cloned().unwrap_or_default()
    }
}

/// Finds suite files by name in a directory.
#[derive(Clone, Debug)]
pub struct SuiteLoader {
    suites_dir: Utf8PathBuf,
}

impl SuiteLoader {
    /// Creates a new `SuiteLoader` for the given directory.
    pub fn new(suites_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            suites_dir: suites_dir.into(),
        }
    }

    /// Returns the directory suites are looked up in.
    pub fn suites_dir(&self) -> &Utf8Path {
        &self.suites_dir
    }

    /// Resolves a suite name to a path. Names ending in `.toml` are treated as paths.
    pub fn suite_path(&self, name: &str) -> Utf8PathBuf {
        if Utf8Path::new(name).extension() == Some(SUITE_FILE_EXTENSION) {
            name.into()
        } else {
            self.suites_dir
                .join(format!("{name}.{SUITE_FILE_EXTENSION}"))
        }
    }

    /// Loads the suite with the given name.
    pub fn load(&self, name: &str) -> Result<SuiteConfig, LoadSuiteError> {
        let path = self.suite_path(name);
        if !path.is_file() {
            return Err(LoadSuiteError::NotFound {
                name: name.to_owned(),
                path,
            });
        }
        SuiteConfig::load(&path)
    }

    /// Lists the names of all suites in the directory, sorted.
    pub fn list(&self) -> Result<Vec<String>, LoadSuiteError> {
        let read_dir_err = |error| LoadSuiteError::ReadDir {
            path: self.suites_dir.clone(),
            error,
        };
        let mut names = Vec::new();
        for entry in self.suites_dir.read_dir_utf8().map_err(read_dir_err)? {
            let entry = entry.map_err(read_dir_err)?;
            let path = entry.path();
            if path.extension() == Some(SUITE_FILE_EXTENSION) {
                if let Some(stem) = path.file_stem() {
                    names.push(stem.to_owned());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}
