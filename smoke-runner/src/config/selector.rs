// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Selection of the tests that make up a test group.

use crate::{errors::SelectorError, test_case::TestKind};
use camino::{Utf8Path, Utf8PathBuf};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

/// The `[selector.<kind>]` section of a suite file.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", default)]
pub struct SelectorConfig {
    /// Globs, relative to the root directory, naming test files or executables.
    pub roots: Vec<String>,

    /// Files listing test executables, one per line. Blank lines and lines starting with `#` are
    /// ignored.
    pub list_files: Vec<Utf8PathBuf>,

    /// If non-empty, only tests matching one of these globs are selected.
    pub include_files: Vec<String>,

    /// Tests matching one of these globs are never selected.
    pub exclude_files: Vec<String>,

    /// For embedded suites: if non-empty, only these suites are selected.
    pub include_suites: Vec<String>,

    /// For embedded suites: these suites are never selected.
    pub exclude_suites: Vec<String>,
}

/// Context for [`SelectorConfig::select`].
#[derive(Clone, Copy, Debug)]
pub struct SelectContext<'a> {
    /// The directory that roots and list-file entries are relative to.
    pub root_dir: &'a Utf8Path,

    /// The embedded-suite runner, asked for its suites with `--list`.
    pub embedded_runner: &'a Utf8Path,

    /// The router executable, which is the single test of a server-harness group.
    pub router: &'a Utf8Path,
}

impl SelectorConfig {
    /// Selects the tests for a group of the given kind, in a stable order.
    pub fn select(
        &self,
        kind: TestKind,
        cx: &SelectContext<'_>,
    ) -> Result<Vec<String>, SelectorError> {
        let tests = match kind {
            TestKind::EmbeddedSuite => self.select_suites(cx.embedded_runner)?,
            TestKind::ServerHarness => vec![cx.router.to_string()],
            TestKind::UnitTest | TestKind::IntegrationTest | TestKind::ScriptTest => {
                let mut tests = IndexSet::new();
                for list_file in &self.list_files {
                    tests.extend(read_list_file(&cx.root_dir.join(list_file))?);
                }
                for root in &self.roots {
                    tests.extend(expand_root(kind, cx.root_dir, root)?);
                }
                self.filter_files(kind, tests)?
            }
        };
        debug!(
            target: "smoke::selector",
            "selected {} {kind}s",
            tests.len(),
        );
        Ok(tests)
    }

    fn filter_files(
        &self,
        kind: TestKind,
        tests: IndexSet<String>,
    ) -> Result<Vec<String>, SelectorError> {
        let include = build_globset(kind, &self.include_files)?;
        let exclude = build_globset(kind, &self.exclude_files)?;
        Ok(tests
            .into_iter()
            .filter(|test| self.include_files.is_empty() || include.is_match(test))
            .filter(|test| !exclude.is_match(test))
            .collect())
    }

    fn select_suites(&self, runner: &Utf8Path) -> Result<Vec<String>, SelectorError> {
        let output = duct::cmd(runner.as_std_path(), ["--list"])
            .stdout_capture()
            .read()
            .map_err(|error| SelectorError::ListSuites {
                executable: runner.to_owned(),
                error,
            })?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter(|suite| {
                self.include_suites.is_empty() || self.include_suites.iter().any(|s| s == suite)
            })
            .filter(|suite| !self.exclude_suites.iter().any(|s| s == suite))
            .map(str::to_owned)
            .collect())
    }
}

fn read_list_file(path: &Utf8Path) -> Result<Vec<String>, SelectorError> {
    let contents = std::fs::read_to_string(path).map_err(|error| SelectorError::ListFile {
        path: path.to_owned(),
        error,
    })?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect())
}

fn has_glob_meta(component: &str) -> bool {
    component.contains(['*', '?', '[', '{'])
}

/// Expands one root glob into the files it matches, sorted by path.
fn expand_root(
    kind: TestKind,
    root_dir: &Utf8Path,
    root: &str,
) -> Result<Vec<String>, SelectorError> {
    if !has_glob_meta(root) {
        return Ok(if root_dir.join(root).exists() {
            vec![root.to_owned()]
        } else {
            Vec::new()
        });
    }

    let glob = build_glob(kind, root)?;

    // Walk from the longest prefix that has no glob metacharacters.
    let base: Utf8PathBuf = Utf8Path::new(root)
        .components()
        .take_while(|c| !has_glob_meta(c.as_str()))
        .collect();
    let walk_root = root_dir.join(&base);
    if !walk_root.is_dir() {
        return Ok(Vec::new());
    }

    let mut matches = Vec::new();
    for entry in WalkDir::new(&walk_root).sort_by_file_name() {
        let entry = entry.map_err(|error| SelectorError::Walk {
            path: walk_root.clone(),
            error,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root_dir.as_std_path()) else {
            continue;
        };
        let Some(relative) = relative.to_str() else {
            continue;
        };
        let relative = relative.replace(std::path::MAIN_SEPARATOR, "/");
        if glob.is_match(&relative) {
            matches.push(relative);
        }
    }
    Ok(matches)
}

fn build_glob(kind: TestKind, glob: &str) -> Result<GlobSet, SelectorError> {
    build_globset(kind, std::slice::from_ref(&glob.to_owned()))
}

fn build_globset(kind: TestKind, globs: &[String]) -> Result<GlobSet, SelectorError> {
    let mut builder = GlobSetBuilder::new();
    for glob in globs {
        let compiled = GlobBuilder::new(glob)
            .literal_separator(true)
            .build()
            .map_err(|error| SelectorError::InvalidGlob {
                test_kind: kind,
                glob: glob.clone(),
                error,
            })?;
        builder.add(compiled);
    }
    builder.build().map_err(|error| SelectorError::InvalidGlob {
        test_kind: kind,
        glob: globs.join(", "),
        error,
    })
}
