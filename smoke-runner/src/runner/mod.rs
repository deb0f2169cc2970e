// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test runner.
//!
//! The main structure in this module is [`SuiteDriver`]. For every group of every suite it builds
//! a [`TestGroupExecutor`], which splits the group's tests across jobs. Each job owns one fixture
//! and runs its share of tests one at a time; jobs run concurrently on a multi-threaded Tokio
//! runtime, and report what happens to each test as [`JobEvent`]s.

mod executor;
mod imp;
mod job;
mod partition;
mod suite;

pub use executor::*;
pub use imp::*;
pub use job::{JobEvent, JobEventKind};
pub use partition::*;
pub use suite::*;
