// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use owo_colors::OwoColorize;
use smoke_metadata::SmokeExitCode;
use smoke_runner::errors::{LoadSuiteError, ReportWriteError, RunnerBuildError};
use std::error::Error;
use thiserror::Error;
use tracing::error;

// The #[error()] strings are placeholders. Errors are meant to be printed with
// display_to_stderr, which colorizes them and prints the cause chain.

/// An error that smoke reports to the user and exits with, rather than panicking.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("failed to load suite")]
    LoadSuite {
        #[from]
        err: LoadSuiteError,
    },
    #[error("failed to list suites")]
    ListSuites {
        #[source]
        err: LoadSuiteError,
    },
    #[error("failed to build suite driver")]
    RunnerBuild {
        #[from]
        err: RunnerBuildError,
    },
    #[error("failed to write report")]
    ReportWrite {
        #[from]
        err: ReportWriteError,
    },
    #[error("failed to write to output")]
    WriteOutput {
        #[source]
        err: std::io::Error,
    },
}

impl ExpectedError {
    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::LoadSuite { .. } | Self::ListSuites { .. } | Self::RunnerBuild { .. } => {
                SmokeExitCode::SETUP_ERROR
            }
            Self::ReportWrite { .. } | Self::WriteOutput { .. } => {
                SmokeExitCode::WRITE_OUTPUT_ERROR
            }
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match self {
            Self::LoadSuite { err } => {
                // The suite-level message names the suite; its source says what went wrong.
                error!("{err}");
                err.source()
            }
            Self::ListSuites { err } => {
                error!("failed to list suites");
                Some(err as &dyn Error)
            }
            Self::RunnerBuild { err } => {
                error!("failed to set up the run");
                Some(err as &dyn Error)
            }
            Self::ReportWrite { err } => {
                error!("{err}");
                err.source()
            }
            Self::WriteOutput { err } => {
                error!("failed to write to {}", "stdout".style(styles.bold));
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}
