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

/// A standalone test executable. The test's name is the path to the executable.
#[derive(Clone, Debug)]
pub struct UnitTestCase {
    core: TestCaseCore,
    options: OptionsMap,
}

impl UnitTestCase {
    /// Creates a new unit test.
    pub fn new(executable: &str, config: &TestCaseConfig) -> Self {
        Self {
            core: TestCaseCore::new(TestKind::UnitTest, executable),
            options: config.options.clone(),
        }
    }
}

impl TestCase for UnitTestCase {
    fn core(&self) -> &TestCaseCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TestCaseCore {
        &mut self.core
    }

    fn configure(&mut self, fixture: &dyn Fixture) -> Result<(), TestCaseError> {
        self.core.bind(fixture);
        Ok(())
    }

    fn make_process(&self) -> ProcessSpec {
        generic_program(Utf8Path::new(self.core.name()), &self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::RunConfig, test_helpers::FakeFixture};
    use serde_json::json;

    #[test]
    fn options_follow_executable() {
        let mut config = TestCaseConfig::default();
        config.options.insert("verbose".to_owned(), json!(true));
        let mut test = UnitTestCase::new("build/unittests/db_test", &config);
        assert_eq!(test.as_command(), "build/unittests/db_test --verbose");

        let fixture = FakeFixture::new(&RunConfig::default(), 1, Some(20250));
        test.configure(&fixture).expect("configured");
        assert_eq!(test.core().binding().map(|b| b.job.get()), Some(1));
        assert_eq!(test.as_command(), "build/unittests/db_test --verbose");
    }
}
