// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for smoke-runner.

use camino::Utf8Path;
use std::io;

/// Utilities for pluralizing various words based on count or plurality.
pub(crate) mod plural {
    /// Returns "test" if `count` is 1, otherwise "tests".
    pub(crate) fn tests_str(count: usize) -> &'static str {
        if count == 1 { "test" } else { "tests" }
    }

    /// Returns "was" if `count` is 1, otherwise "were".
    pub(crate) fn were_str(count: usize) -> &'static str {
        if count == 1 { "was" } else { "were" }
    }
}

/// Removes `dir` and everything in it, if it exists, then creates it again.
pub(crate) fn recreate_dir(dir: &Utf8Path) -> io::Result<()> {
    remove_dir_if_exists(dir)?;
    std::fs::create_dir_all(dir)
}

pub(crate) fn remove_dir_if_exists(dir: &Utf8Path) -> io::Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error),
    }
}
