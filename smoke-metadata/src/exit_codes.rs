// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `smoke` runs.
///
/// When more than one suite runs, the process exits with the maximum return code observed across
/// all suites, so anything not listed here is a return code propagated from a test group.
pub enum SmokeExitCode {}

impl SmokeExitCode {
    /// Every suite passed.
    pub const OK: i32 = 0;

    /// At least one test failed or errored.
    pub const TEST_RUN_FAILED: i32 = 1;

    /// An unexpected internal error occurred while running a test group, or a fixture could not be
    /// set up or torn down.
    pub const INTERNAL_ERROR: i32 = 2;

    /// A user issue happened while setting up a smoke invocation: a suite file could not be loaded,
    /// the port space was too small for the requested number of jobs, and so on.
    pub const SETUP_ERROR: i32 = 96;

    /// Writing the report file failed.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;

    /// The run was interrupted by the user or by the CI timeout signal. Mirrors the exit code a
    /// shell reports for SIGINT.
    pub const INTERRUPTED: i32 = 130;
}
