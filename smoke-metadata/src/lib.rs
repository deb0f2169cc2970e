// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Machine-readable output for smoke.
//!
//! The `smoke` binary persists a report file at the end of every run, including runs that were
//! cut short by `--fail-fast` or by an external interrupt. This crate contains the serde model for
//! that file, along with the exit codes the binary documents.

mod exit_codes;
mod report;

pub use exit_codes::*;
pub use report::*;
