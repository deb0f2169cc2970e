// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for smoke: the run-wide settings snapshot, option maps, and suite files.
//!
//! Configuration is resolved once, at startup, in three layers: built-in defaults, suite files,
//! then the command line. The command line always wins.

mod options;
mod run_config;
mod selector;
mod suite;

pub use options::*;
pub use run_config::*;
pub use selector::*;
pub use suite::*;
