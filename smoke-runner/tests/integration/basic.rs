// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use camino::Utf8Path;
use color_eyre::eyre::{Result, ensure};
use pretty_assertions::assert_eq;
use smoke_metadata::{ReportFile, TestStatusKind};
use smoke_runner::{
    runner::{RunOutcome, SuiteDriverBuilder},
    signal::{ShutdownEvent, SignalHandlerKind},
};
use std::{num::NonZeroUsize, time::Duration};

/// (file name, execution, status, exit code) for every result in the report, sorted.
fn results(report: &ReportFile) -> Vec<(String, usize, TestStatusKind, Option<i32>)> {
    let mut results: Vec<_> = report
        .iter_results()
        .map(|result| {
            let name = Utf8Path::new(&result.test_file)
                .file_name()
                .unwrap_or_default()
                .to_owned();
            (name, result.execution, result.status, result.exit_code)
        })
        .collect();
    results.sort_by(|a, b| (&a.0, a.1).cmp(&(&b.0, b.1)));
    results
}

#[test]
fn mixed_results_across_jobs() -> Result<()> {
    test_init();
    let ws = Workspace::new()?;
    let tests = vec![
        ws.script_test("a.js", "exit 0")?,
        ws.script_test("b.js", "exit 1")?,
        ws.script_test("c.js", "exit 0")?,
    ];
    let mut run_config = ws.run_config(2)?;
    run_config.fail_fast = false;
    run_config.junit_file = Some(ws.junit_file());

    let driver = SuiteDriverBuilder::default().build(run_config, SignalHandlerKind::Noop)?;
    let mut suites = vec![script_suite("core", tests)];
    let outcome = driver.run_all(&mut suites)?;

    assert_eq!(
        outcome,
        RunOutcome {
            exit_code: 1,
            interrupted: false
        }
    );
    assert_eq!(suites[0].groups()[0].return_code(), Some(1));
    assert_eq!(suites[0].return_code(), 1);

    let report = ws.read_report()?;
    assert_eq!(report.exit_code, Some(1));
    assert_eq!(report.failures, 1);
    assert!(!report.interrupted);
    assert_eq!(report.suites[0].return_code, Some(1));
    assert!(report.suites[0].end.is_some());
    assert_eq!(
        results(&report),
        vec![
            ("a.js".to_owned(), 0, TestStatusKind::Pass, Some(0)),
            ("b.js".to_owned(), 0, TestStatusKind::Fail, Some(1)),
            ("c.js".to_owned(), 0, TestStatusKind::Pass, Some(0)),
        ]
    );

    let junit = std::fs::read_to_string(ws.junit_file())?;
    ensure!(junit.contains("<testsuite"), "JUnit report has a test suite");
    ensure!(junit.contains("b.js"), "JUnit report names the failed test");
    Ok(())
}

#[test]
fn fail_fast_stops_the_run() -> Result<()> {
    test_init();
    let ws = Workspace::new()?;
    let first = vec![
        ws.script_test("a.js", "exit 0")?,
        ws.script_test("b.js", "exit 1")?,
        ws.script_test("c.js", "exit 0")?,
    ];
    let second = vec![ws.script_test("d.js", "exit 0")?];
    let run_config = ws.run_config(1)?;
    ensure!(run_config.fail_fast, "fail-fast is on by default");

    let driver = SuiteDriverBuilder::default().build(run_config, SignalHandlerKind::Noop)?;
    let mut suites = vec![script_suite("first", first), script_suite("second", second)];
    let outcome = driver.run_all(&mut suites)?;

    assert_eq!(outcome.exit_code, 1);
    assert_eq!(suites[1].groups()[0].return_code(), None, "second suite never ran");
    assert_eq!(suites[1].start_time(), None);

    let report = ws.read_report()?;
    assert_eq!(
        results(&report),
        vec![
            ("a.js".to_owned(), 0, TestStatusKind::Pass, Some(0)),
            ("b.js".to_owned(), 0, TestStatusKind::Fail, Some(1)),
            ("c.js".to_owned(), 0, TestStatusKind::Skipped, None),
        ]
    );
    assert_eq!(report.suites[1].return_code, None);
    assert!(report.suites[1].groups[0].results.is_empty());
    Ok(())
}

#[test]
fn repeated_executions() -> Result<()> {
    test_init();
    let ws = Workspace::new()?;
    let tests = vec![
        ws.script_test("a.js", "exit 0")?,
        ws.script_test("b.js", "exit 0")?,
    ];
    let mut run_config = ws.run_config(2)?;
    run_config.repeat = NonZeroUsize::new(2).unwrap_or(NonZeroUsize::MIN);

    let driver = SuiteDriverBuilder::default().build(run_config, SignalHandlerKind::Noop)?;
    let mut suites = vec![script_suite("core", tests)];
    let outcome = driver.run_all(&mut suites)?;
    assert_eq!(outcome.exit_code, 0);

    let report = ws.read_report()?;
    assert_eq!(
        results(&report),
        vec![
            ("a.js".to_owned(), 0, TestStatusKind::Pass, Some(0)),
            ("a.js".to_owned(), 1, TestStatusKind::Pass, Some(0)),
            ("b.js".to_owned(), 0, TestStatusKind::Pass, Some(0)),
            ("b.js".to_owned(), 1, TestStatusKind::Pass, Some(0)),
        ]
    );
    Ok(())
}

#[test]
fn interrupt_writes_report() -> Result<()> {
    test_init();
    let ws = Workspace::new()?;
    let tests = vec![
        ws.script_test("a.js", "exit 0")?,
        ws.script_test("slow.js", SLOW_SCRIPT)?,
        ws.script_test("c.js", "exit 0")?,
    ];
    let run_config = ws.run_config(1)?;

    let driver = SuiteDriverBuilder::default().build(run_config, SignalHandlerKind::Noop)?;
    let controller = driver.interrupt_controller().clone();
    let interrupter = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(500));
        controller.interrupt(ShutdownEvent::Interrupt);
    });

    let mut suites = vec![script_suite("core", tests)];
    let outcome = driver.run_all(&mut suites)?;
    interrupter.join().expect("interrupter thread joined");

    assert_eq!(
        outcome,
        RunOutcome {
            exit_code: 130,
            interrupted: true
        }
    );
    assert!(suites[0].is_interrupted());
    assert_eq!(suites[0].return_code(), 130);

    let report = ws.read_report()?;
    assert!(report.interrupted);
    assert_eq!(report.exit_code, Some(130));
    assert!(report.suites[0].interrupted);
    assert_eq!(report.suites[0].groups[0].return_code, Some(130));
    assert_eq!(
        results(&report),
        vec![
            ("a.js".to_owned(), 0, TestStatusKind::Pass, Some(0)),
            ("c.js".to_owned(), 0, TestStatusKind::Skipped, None),
            ("slow.js".to_owned(), 0, TestStatusKind::Fail, Some(-2)),
        ]
    );
    Ok(())
}
