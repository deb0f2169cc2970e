// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#[cfg(unix)]
mod basic;
#[cfg(unix)]
mod fixtures;
