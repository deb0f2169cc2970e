// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use tokio::process::Child;

// Process groups are a Unix concept.
pub(super) fn set_process_group(_cmd: &mut std::process::Command) {}

pub(super) fn terminate(child: &mut Child, _pid: u32) {
    // There's no graceful equivalent of SIGTERM for arbitrary console processes.
    let _ = child.start_kill();
}

pub(super) fn kill(child: &mut Child, _pid: u32) {
    let _ = child.start_kill();
}

pub(super) fn exit_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}
