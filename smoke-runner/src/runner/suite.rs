// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::shuffle_tests;
use crate::{
    config::{SelectContext, SuiteConfig},
    errors::LoadSuiteError,
    test_case::TestKind,
};
use chrono::{DateTime, Local};
use smoke_metadata::SmokeExitCode;

/// The tests of one kind within a suite.
#[derive(Clone, Debug)]
pub struct TestGroup {
    test_kind: TestKind,
    tests: Vec<String>,
    return_code: Option<i32>,
}

impl TestGroup {
    /// Creates a group that hasn't run yet.
    pub fn new(test_kind: TestKind, tests: Vec<String>) -> Self {
        Self {
            test_kind,
            tests,
            return_code: None,
        }
    }

    /// The kind of every test in this group.
    pub fn test_kind(&self) -> TestKind {
        self.test_kind
    }

    /// The tests, in the order they'll be dispatched.
    pub fn tests(&self) -> &[String] {
        &self.tests
    }

    /// The group's return code, once it has run.
    pub fn return_code(&self) -> Option<i32> {
        self.return_code
    }

    /// Shuffles the tests deterministically.
    pub fn shuffle(&mut self, seed: u64) {
        shuffle_tests(&mut self.tests, seed);
    }

    pub(crate) fn set_return_code(&mut self, return_code: i32) {
        self.return_code = Some(return_code);
    }
}

/// A named suite: its configuration and the groups selected from it.
#[derive(Clone, Debug)]
pub struct Suite {
    name: String,
    config: SuiteConfig,
    groups: Vec<TestGroup>,
    start: Option<DateTime<Local>>,
    end: Option<DateTime<Local>>,
    interrupted: bool,
}

impl Suite {
    /// Creates a suite from already-selected groups.
    pub fn new(name: impl Into<String>, config: SuiteConfig, groups: Vec<TestGroup>) -> Self {
        Self {
            name: name.into(),
            config,
            groups,
            start: None,
            end: None,
            interrupted: false,
        }
    }

    /// Selects the tests of every group the suite configures.
    pub fn from_config(
        name: impl Into<String>,
        config: SuiteConfig,
        cx: &SelectContext<'_>,
    ) -> Result<Self, LoadSuiteError> {
        let name = name.into();
        let groups = config
            .selector
            .iter()
            .map(|(&kind, selector)| {
                let tests = selector
                    .select(kind, cx)
                    .map_err(|error| LoadSuiteError::Select {
                        name: name.clone(),
                        error,
                    })?;
                Ok(TestGroup::new(kind, tests))
            })
            .collect::<Result<Vec<_>, LoadSuiteError>>()?;
        Ok(Self::new(name, config, groups))
    }

    /// The suite's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The suite's configuration.
    pub fn config(&self) -> &SuiteConfig {
        &self.config
    }

    /// The suite's groups, in file order.
    pub fn groups(&self) -> &[TestGroup] {
        &self.groups
    }

    /// The total number of tests across groups.
    pub fn num_tests(&self) -> usize {
        self.groups.iter().map(|group| group.tests.len()).sum()
    }

    /// Returns true if the run was interrupted while this suite was executing.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    /// When the suite started, once it has.
    pub fn start_time(&self) -> Option<DateTime<Local>> {
        self.start
    }

    /// When the suite finished, once it has.
    pub fn end_time(&self) -> Option<DateTime<Local>> {
        self.end
    }

    /// The suite's return code: 130 if interrupted, otherwise the highest group return code.
    /// Groups that never ran don't contribute.
    pub fn return_code(&self) -> i32 {
        if self.interrupted {
            return SmokeExitCode::INTERRUPTED;
        }
        self.groups
            .iter()
            .filter_map(TestGroup::return_code)
            .max()
            .unwrap_or(SmokeExitCode::OK)
    }

    pub(crate) fn record_start(&mut self) -> DateTime<Local> {
        let now = Local::now();
        self.start = Some(now);
        now
    }

    pub(crate) fn record_end(&mut self) -> DateTime<Local> {
        let now = Local::now();
        self.end = Some(now);
        now
    }

    pub(crate) fn mark_interrupted(&mut self) {
        self.interrupted = true;
    }

    pub(crate) fn parts_mut(&mut self) -> (&str, &SuiteConfig, &mut [TestGroup]) {
        (&self.name, &self.config, &mut self.groups)
    }
}
