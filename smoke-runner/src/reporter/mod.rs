// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Recording test results and writing reports.
//!
//! Jobs send [`JobEvent`](crate::runner::JobEvent)s as tests start and finish; the executor
//! feeds them into a [`RunRecorder`], which can produce a
//! [`ReportFile`](smoke_metadata::ReportFile) at any time. The [`ReportWriter`] persists it as
//! JSON and, optionally, as JUnit XML.

mod recorder;
mod report;
mod summary;
mod writer;

pub use recorder::*;
pub use report::*;
pub use summary::Summary;
pub(crate) use summary::summarize_execution;
pub use writer::*;
