// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{TestCase, TestCaseConfig, TestCaseCore, TestKind};
use crate::{
    config::OptionsMap,
    errors::TestCaseError,
    fixtures::Fixture,
    process::ProcessSpec,
    programs::generic_program,
};
use camino::Utf8Path;

/// The option through which integration tests receive the fixture's address.
pub const CONNECTION_STRING_OPTION: &str = "connectionString";

/// A test executable that connects to the fixture.
#[derive(Clone, Debug)]
pub struct IntegrationTestCase {
    core: TestCaseCore,
    options: OptionsMap,
}

impl IntegrationTestCase {
    /// Creates a new integration test.
    pub fn new(executable: &str, config: &TestCaseConfig) -> Self {
        Self {
            core: TestCaseCore::new(TestKind::IntegrationTest, executable),
            options: config.options.clone(),
        }
    }
}

impl TestCase for IntegrationTestCase {
    fn core(&self) -> &TestCaseCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TestCaseCore {
        &mut self.core
    }

    fn configure(&mut self, fixture: &dyn Fixture) -> Result<(), TestCaseError> {
        self.core.bind(fixture);
        let connection_string = fixture.internal_connection_string().map_err(|error| {
            TestCaseError::Infrastructure {
                description: self.core.description(),
                error,
            }
        })?;
        self.options
            .insert(CONNECTION_STRING_OPTION.to_owned(), connection_string.into());
        Ok(())
    }

    fn make_process(&self) -> ProcessSpec {
        generic_program(Utf8Path::new(self.core.name()), &self.options)
    }
}
