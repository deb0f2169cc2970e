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

/// The flag that puts the router into its self-test mode.
pub const SELF_TEST_FLAG: &str = "test";

/// The router run in its self-test mode: it runs its built-in checks and exits.
///
/// The test's name is the path to the router executable.
#[derive(Clone, Debug)]
pub struct ServerHarnessCase {
    core: TestCaseCore,
    options: OptionsMap,
}

impl ServerHarnessCase {
    /// Creates a new server-harness test.
    pub fn new(executable: &str, config: &TestCaseConfig) -> Self {
        Self {
            core: TestCaseCore::new(TestKind::ServerHarness, executable),
            options: config.options.clone(),
        }
    }
}

impl TestCase for ServerHarnessCase {
    fn core(&self) -> &TestCaseCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TestCaseCore {
        &mut self.core
    }

    fn configure(&mut self, fixture: &dyn Fixture) -> Result<(), TestCaseError> {
        self.core.bind(fixture);
        self.options
            .entry(SELF_TEST_FLAG.to_owned())
            .or_insert_with(|| "".into());
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
    fn self_test_flag_is_added() {
        let mut test = ServerHarnessCase::new("mongos", &TestCaseConfig::default());
        test.configure(&FakeFixture::new(&RunConfig::default(), 0, None))
            .expect("configured");
        assert_eq!(test.as_command(), "mongos --test");
    }

    #[test]
    fn caller_supplied_flag_is_kept() {
        let mut config = TestCaseConfig::default();
        config.options.insert("verbose".to_owned(), json!(true));
        config.options.insert(SELF_TEST_FLAG.to_owned(), json!(false));
        let mut test = ServerHarnessCase::new("build/mongos", &config);
        test.configure(&FakeFixture::new(&RunConfig::default(), 0, None))
            .expect("configured");
        assert_eq!(test.as_command(), "build/mongos --verbose");
    }
}
