// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Building command lines for the programs smoke runs.
//!
//! Options are turned into arguments with these rules:
//!
//! * `true` or `""`: a bare flag, `--key`.
//! * `false` or `null`: omitted.
//! * a string or number: `--key value`.
//! * an array: the option repeated once per element.
//! * the `setParameter` key, if it holds a map: one `--setParameter name=value` per entry.

use crate::{config::OptionsMap, process::ProcessSpec};
use camino::Utf8Path;
use serde_json::Value;

/// The option holding server parameters.
pub const SET_PARAMETER: &str = "setParameter";

/// The shell option holding additional code to evaluate before the script.
pub const EVAL: &str = "eval";

/// Converts an options map into command-line arguments.
pub fn options_to_args(options: &OptionsMap) -> Vec<String> {
    let mut args = Vec::new();
    for (key, value) in options {
        push_option(&mut args, key, value);
    }
    args
}

fn push_option(args: &mut Vec<String>, key: &str, value: &Value) {
    match value {
        Value::Null | Value::Bool(false) => {}
        Value::Bool(true) => args.push(format!("--{key}")),
        Value::String(s) if s.is_empty() => args.push(format!("--{key}")),
        Value::Array(values) => {
            for value in values {
                push_option(args, key, value);
            }
        }
        Value::Object(params) if key == SET_PARAMETER => {
            for (name, value) in params {
                args.push(format!("--{SET_PARAMETER}"));
                args.push(format!("{name}={}", scalar_to_string(value)));
            }
        }
        other => {
            args.push(format!("--{key}"));
            args.push(scalar_to_string(other));
        }
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Returns a standalone server process. `options` must include `port` and `dbpath`.
pub fn server_program(executable: &Utf8Path, options: &OptionsMap) -> ProcessSpec {
    debug_assert!(
        options.contains_key("port") && options.contains_key("dbpath"),
        "server options must include port and dbpath"
    );
    generic_program(executable, options)
}

/// Returns a sharding router process. `options` must include `port` and `configdb`.
pub fn router_program(executable: &Utf8Path, options: &OptionsMap) -> ProcessSpec {
    generic_program(executable, options)
}

/// Returns a shell process running a script.
///
/// Global variables are assigned in an `--eval` prelude, in order, followed by the `eval` option
/// if it is set. A connection string, if given, is passed positionally before the script.
pub fn shell_program(
    executable: &Utf8Path,
    script: Option<&Utf8Path>,
    connection_string: Option<&str>,
    options: &OptionsMap,
    global_vars: &OptionsMap,
) -> ProcessSpec {
    let mut options = options.clone();

    let mut prelude: Vec<String> = global_vars
        .iter()
        .map(|(name, value)| format!("{name} = {value};"))
        .collect();
    if let Some(eval) = options.shift_remove(EVAL) {
        prelude.push(scalar_to_string(&eval));
    }

    if connection_string.is_some() {
        // The port is part of the connection string.
        options.shift_remove("port");
    }

    let mut spec = ProcessSpec::new(executable);
    if !prelude.is_empty() {
        spec.args(["--eval".to_owned(), prelude.join(" ")]);
    }
    spec.args(options_to_args(&options));
    if let Some(connection_string) = connection_string {
        spec.arg(connection_string);
    }
    if let Some(script) = script {
        spec.arg(script.as_str());
    }
    spec
}

/// Returns an embedded test-suite runner process for the given suites.
pub fn embedded_suite_program(
    executable: &Utf8Path,
    suites: &[&str],
    options: &OptionsMap,
) -> ProcessSpec {
    let mut spec = generic_program(executable, options);
    spec.args(suites.iter().copied());
    spec
}

/// Returns a process for an arbitrary executable.
pub fn generic_program(executable: &Utf8Path, options: &OptionsMap) -> ProcessSpec {
    let mut spec = ProcessSpec::new(executable);
    spec.args(options_to_args(options));
    spec
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn map(value: Value) -> OptionsMap {
        serde_json::from_value(value).expect("valid options map")
    }

    #[test]
    fn option_conversion() {
        let options = map(json!({
            "port": 20000,
            "dbpath": "/data/db/job0",
            "nojournal": "",
            "quiet": true,
            "verbose": false,
            "keyFile": null,
            "bind_ip": ["127.0.0.1", "::1"],
            "setParameter": {"enableTestCommands": 1, "logLevel": "2"},
        }));

        assert_eq!(
            options_to_args(&options),
            vec![
                "--port",
                "20000",
                "--dbpath",
                "/data/db/job0",
                "--nojournal",
                "--quiet",
                "--bind_ip",
                "127.0.0.1",
                "--bind_ip",
                "::1",
                "--setParameter",
                "enableTestCommands=1",
                "--setParameter",
                "logLevel=2",
            ]
        );
    }

    #[test]
    fn shell_with_prelude_and_connection_string() {
        let options = map(json!({"port": 20000, "nodb": "", "eval": "load('x.js');"}));
        let global_vars = map(json!({
            "TestData": {"minPort": 20010, "maxPort": 20249},
            "TestRunner.dataDir": "/data/db/job0/mongorunner",
        }));

        let spec = shell_program(
            Utf8Path::new("mongo"),
            Some(Utf8Path::new("jstests/core/a.js")),
            Some("mongodb://localhost:20000"),
            &options,
            &global_vars,
        );

        assert_eq!(
            spec.get_args(),
            [
                "--eval",
                "TestData = {\"minPort\":20010,\"maxPort\":20249}; \
                 TestRunner.dataDir = \"/data/db/job0/mongorunner\"; load('x.js');",
                "--nodb",
                "mongodb://localhost:20000",
                "jstests/core/a.js",
            ]
        );
    }

    #[test]
    fn shell_without_globals_keeps_port() {
        let spec = shell_program(
            Utf8Path::new("mongo"),
            Some(Utf8Path::new("a.js")),
            None,
            &map(json!({"port": 20001})),
            &OptionsMap::new(),
        );
        assert_eq!(spec.as_command(), "mongo --port 20001 a.js");
    }

    #[test]
    fn embedded_suites_trail_options() {
        let spec = embedded_suite_program(
            Utf8Path::new("dbtest"),
            &["query"],
            &map(json!({"dbpath": "/tmp/job1/unittest"})),
        );
        assert_eq!(spec.as_command(), "dbtest --dbpath /tmp/job1/unittest query");
    }
}
