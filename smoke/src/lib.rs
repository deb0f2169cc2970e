// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! smoke runs suites of tests against database server fixtures it starts and stops itself.
//!
//! A suite is a TOML file in the suites directory naming which tests to run and what fixture
//! to run them against. `smoke run core` loads `suites/core.toml`, selects its tests, and runs
//! them; `smoke list-suites` shows what's available.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::{Color, OutputContext, StderrStyles};
