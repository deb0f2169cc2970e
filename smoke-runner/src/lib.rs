// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for smoke, a test-execution harness for database servers.
//!
//! The basic flow of a run is: the [`runner::SuiteDriver`] walks each [`runner::Suite`], and for
//! every test group builds a [`runner::TestGroupExecutor`]. The executor stands up one
//! [`fixtures::Fixture`] per job, runs the group's [`test_case::TestCase`]s across jobs in
//! parallel, and records results through the [`reporter`]. An interrupt from the user or CI
//! stops everything promptly while still flushing a report.

pub mod config;
pub mod errors;
pub mod fixtures;
mod helpers;
pub mod network;
pub mod process;
pub mod programs;
pub mod reporter;
pub mod runner;
pub mod signal;
pub mod test_case;
mod time;

#[cfg(test)]
mod test_helpers;
