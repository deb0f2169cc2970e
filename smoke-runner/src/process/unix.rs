// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use libc::{SIGKILL, SIGTERM};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use tokio::process::Child;

/// Pre-execution configuration on Unix.
///
/// This sets up just the process group ID.
pub(super) fn set_process_group(cmd: &mut std::process::Command) {
    cmd.process_group(0);
}

pub(super) fn terminate(child: &mut Child, pid: u32) {
    signal_group(child, pid, SIGTERM);
}

pub(super) fn kill(child: &mut Child, pid: u32) {
    signal_group(child, pid, SIGKILL);
}

fn signal_group(child: &Child, pid: u32, signal: libc::c_int) {
    if child.id().is_some() {
        // The process was spawned as a process group leader, so its pid is also the process
        // group ID.
        unsafe {
            libc::kill(-(pid as libc::pid_t), signal);
        }
    } else {
        // The child exited already -- don't send a signal.
    }
}

pub(super) fn exit_code(status: std::process::ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => -signal,
        // One of the two is always set on Unix.
        (None, None) => -1,
    }
}
