// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{TestCase, TestCaseConfig, TestCaseCore, TestKind};
use crate::{
    config::{
        DEFAULT_DBPATH_PREFIX, OptionsMap, RunConfig, SCRIPT_SUBDIR, default_executables, get_str,
    },
    errors::TestCaseError,
    fixtures::Fixture,
    helpers::recreate_dir,
    process::ProcessSpec,
    programs::shell_program,
};
use camino::{Utf8Path, Utf8PathBuf};
use serde_json::{Map, Value};

/// The global holding a script's data directory.
pub const DATA_DIR_VAR: &str = "TestRunner.dataDir";

/// The global holding a script's data directory with a trailing separator.
pub const DATA_PATH_VAR: &str = "TestRunner.dataPath";

/// The global object scripts read their parameters from.
pub const TEST_DATA_VAR: &str = "TestData";

/// A script run by the shell against the fixture.
///
/// At configure time the script gets the fixture's port, an empty data directory
/// (`<prefix>/job<N>/mongorunner`, exposed through [`DATA_DIR_VAR`] and [`DATA_PATH_VAR`]), and
/// the job's test port range as `TestData.minPort` and `TestData.maxPort`.
#[derive(Clone, Debug)]
pub struct ScriptTestCase {
    core: TestCaseCore,
    shell: Utf8PathBuf,
    options: OptionsMap,
    global_vars: OptionsMap,
    use_connection_string: bool,
    cli_dbpath_prefix: Option<Utf8PathBuf>,
    storage_engine: Option<String>,
    connection_url: Option<String>,
}

impl ScriptTestCase {
    /// Creates a new script test.
    pub fn new(script: &str, config: &TestCaseConfig, run_config: &RunConfig) -> Self {
        let shell = run_config
            .executables
            .shell
            .clone()
            .or_else(|| config.executable.clone())
            .unwrap_or_else(|| default_executables::SHELL.into());
        Self {
            core: TestCaseCore::new(TestKind::ScriptTest, script),
            shell,
            options: config.options.clone(),
            global_vars: config.global_vars.clone(),
            use_connection_string: config.use_connection_string,
            cli_dbpath_prefix: run_config.dbpath_prefix.clone(),
            storage_engine: run_config.storage_engine.clone(),
            connection_url: None,
        }
    }

    /// The global variables the script is started with.
    pub fn global_vars(&self) -> &OptionsMap {
        &self.global_vars
    }

    fn data_dir_prefix(&self) -> Utf8PathBuf {
        self.cli_dbpath_prefix
            .clone()
            .or_else(|| get_str(&self.global_vars, DATA_DIR_VAR).map(Utf8PathBuf::from))
            .unwrap_or_else(|| DEFAULT_DBPATH_PREFIX.into())
    }
}

impl TestCase for ScriptTestCase {
    fn core(&self) -> &TestCaseCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TestCaseCore {
        &mut self.core
    }

    fn configure(&mut self, fixture: &dyn Fixture) -> Result<(), TestCaseError> {
        let binding = self.core.bind(fixture);
        if let Some(port) = binding.port {
            self.options.insert("port".to_owned(), port.into());
        }

        let data_dir = self
            .data_dir_prefix()
            .join(binding.job.dir_name())
            .join(SCRIPT_SUBDIR);
        // A data path from the suite is kept unless the command line moved the data directory.
        let data_path = match self.global_vars.get(DATA_PATH_VAR) {
            Some(data_path) if self.cli_dbpath_prefix.is_none() => data_path.clone(),
            _ => format!("{data_dir}/").into(),
        };
        self.global_vars
            .insert(DATA_DIR_VAR.to_owned(), data_dir.as_str().into());
        self.global_vars.insert(DATA_PATH_VAR.to_owned(), data_path);

        let mut test_data = match self.global_vars.get(TEST_DATA_VAR) {
            Some(Value::Object(test_data)) => test_data.clone(),
            _ => Map::new(),
        };
        let ports = fixture.job_ports();
        test_data.insert("minPort".to_owned(), ports.min_test_port().into());
        test_data.insert("maxPort".to_owned(), ports.max_test_port().into());
        if let Some(storage_engine) = &self.storage_engine {
            test_data.insert("storageEngine".to_owned(), storage_engine.as_str().into());
        }
        self.global_vars
            .insert(TEST_DATA_VAR.to_owned(), Value::Object(test_data));

        if self.use_connection_string {
            let url = fixture
                .driver_connection_url()
                .map_err(|error| TestCaseError::Infrastructure {
                    description: self.core.description(),
                    error,
                })?;
            self.connection_url = Some(url);
        }

        recreate_dir(&data_dir)
            .map_err(|error| self.core.io_error("failed to recreate data directory", error))
    }

    fn make_process(&self) -> ProcessSpec {
        shell_program(
            &self.shell,
            Some(Utf8Path::new(self.core.name())),
            self.connection_url.as_deref(),
            &self.options,
            &self.global_vars,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::FakeFixture;
    use camino_tempfile::Utf8TempDir;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn configure_injects_fixture_settings() {
        let temp = Utf8TempDir::new().expect("created temp dir");
        let run_config = RunConfig {
            dbpath_prefix: Some(temp.path().to_owned()),
            storage_engine: Some("wiredTiger".to_owned()),
            ..RunConfig::default()
        };
        let mut config = TestCaseConfig::default();
        config
            .global_vars
            .insert(TEST_DATA_VAR.to_owned(), json!({"noJournal": true}));
        config
            .global_vars
            .insert(DATA_PATH_VAR.to_owned(), json!("/from/suite/"));

        let mut test = ScriptTestCase::new("jstests/core/a.js", &config, &run_config);
        test.configure(&FakeFixture::new(&run_config, 1, Some(20250)))
            .expect("configured");

        let data_dir = temp.path().join("job1").join(SCRIPT_SUBDIR);
        assert!(data_dir.is_dir());
        let globals = test.global_vars();
        assert_eq!(globals[DATA_DIR_VAR], json!(data_dir.as_str()));
        assert_eq!(
            globals[DATA_PATH_VAR],
            json!(format!("{data_dir}/")),
            "command-line prefix overrides the suite's data path"
        );
        assert_eq!(
            globals[TEST_DATA_VAR],
            json!({
                "noJournal": true,
                "minPort": 20260,
                "maxPort": 20499,
                "storageEngine": "wiredTiger",
            })
        );

        let command = test.as_command();
        assert!(command.starts_with("mongo --eval "), "{command}");
        assert!(
            command.ends_with("--port 20250 jstests/core/a.js"),
            "{command}"
        );
    }

    #[test]
    fn suite_data_dir_and_connection_url() {
        let temp = Utf8TempDir::new().expect("created temp dir");
        let run_config = RunConfig::default();
        let mut config = TestCaseConfig {
            use_connection_string: true,
            ..TestCaseConfig::default()
        };
        config
            .global_vars
            .insert(DATA_DIR_VAR.to_owned(), json!(temp.path().as_str()));
        config
            .global_vars
            .insert(DATA_PATH_VAR.to_owned(), json!("/custom/"));

        let mut test = ScriptTestCase::new("jstests/repl/b.js", &config, &run_config);
        test.configure(&FakeFixture::new(&run_config, 0, Some(20000)))
            .expect("configured");

        let data_dir = temp.path().join("job0").join(SCRIPT_SUBDIR);
        assert!(data_dir.is_dir());
        assert_eq!(test.global_vars()[DATA_DIR_VAR], json!(data_dir.as_str()));
        assert_eq!(test.global_vars()[DATA_PATH_VAR], json!("/custom/"));

        let spec = test.make_process();
        let args = spec.get_args();
        assert_eq!(
            &args[args.len() - 2..],
            ["mongodb://localhost:20000", "jstests/repl/b.js"],
            "the port travels in the connection URL"
        );
        assert!(!args.iter().any(|arg| arg == "--port"));
    }

    #[test]
    fn as_command_before_configure() {
        let test = ScriptTestCase::new(
            "jstests/core/a.js",
            &TestCaseConfig::default(),
            &RunConfig::default(),
        );
        assert_eq!(test.as_command(), "mongo jstests/core/a.js");
    }
}
