// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Spawning and managing external processes: servers, routers, shells and test executables.
//!
//! A [`ProcessSpec`] describes a command line. [`ProcessSpec::start`] spawns it and returns a
//! [`ProcessHandle`], which is owned by exactly one test case or fixture.

#[cfg(unix)]
#[path = "unix.rs"]
mod os;

#[cfg(windows)]
#[path = "windows.rs"]
mod os;

use crate::errors::SpawnError;
use camino::{Utf8Path, Utf8PathBuf};
use std::{fmt, io, process::Stdio, time::Duration};
use tokio::process::Child;
use tracing::debug;

/// The time a process is given to exit after being asked to terminate, before it is killed.
pub const DEFAULT_STOP_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// A description of a process to start.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessSpec {
    executable: Utf8PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
    cwd: Option<Utf8PathBuf>,
}

impl ProcessSpec {
    /// Creates a new `ProcessSpec` for the given executable, with no arguments.
    pub fn new(executable: impl Into<Utf8PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
        }
    }

    /// Appends an argument.
    pub fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets an environment variable for the process.
    pub fn env(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Sets the working directory of the process.
    pub fn current_dir(&mut self, cwd: impl Into<Utf8PathBuf>) -> &mut Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Returns the executable.
    pub fn executable(&self) -> &Utf8Path {
        &self.executable
    }

    /// Returns the arguments.
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Returns the command line as a single shell-quoted string, suitable for copying into a
    /// terminal.
    pub fn as_command(&self) -> String {
        shell_words::join(
            std::iter::once(self.executable.as_str()).chain(self.args.iter().map(String::as_str)),
        )
    }

    /// Starts the process.
    ///
    /// Standard input is closed. On Unix, the process is placed in its own process group so that
    /// stopping it also stops anything it spawned.
    pub fn start(&self) -> Result<ProcessHandle, SpawnError> {
        let mut cmd = std::process::Command::new(self.executable.as_std_path());
        cmd.args(&self.args).stdin(Stdio::null());
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        os::set_process_group(&mut cmd);

        let mut cmd = tokio::process::Command::from(cmd);
        cmd.kill_on_drop(true);
        let child = cmd
            .spawn()
            .map_err(|error| SpawnError::new(self.as_command(), error))?;
        // A freshly spawned child that hasn't been waited on always has a pid.
        let pid = child.id().unwrap_or_default();
        debug!(target: "smoke::process", pid, command = %self.as_command(), "spawned process");

        Ok(ProcessHandle {
            command: self.as_command(),
            child,
            pid,
            exit_code: None,
        })
    }
}

impl fmt::Display for ProcessSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_command())
    }
}

/// A running (or exited) process.
///
/// The process is killed if the handle is dropped while it is still running.
#[derive(Debug)]
pub struct ProcessHandle {
    command: String,
    child: Child,
    pid: u32,
    exit_code: Option<i32>,
}

impl ProcessHandle {
    /// Returns the process ID.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Returns the command line the process was started with.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Returns the exit code if the process has exited, without blocking.
    pub fn poll(&mut self) -> io::Result<Option<i32>> {
        if let Some(code) = self.exit_code {
            return Ok(Some(code));
        }
        let status = self.child.try_wait()?;
        Ok(status.map(|status| self.record(status)))
    }

    /// Returns true if the process hasn't exited yet.
    pub fn is_running(&mut self) -> bool {
        matches!(self.poll(), Ok(None))
    }

    /// Waits for the process to exit and returns its exit code.
    ///
    /// On Unix, a process killed by a signal has the exit code `-signum`.
    pub async fn wait(&mut self) -> io::Result<i32> {
        if let Some(code) = self.exit_code {
            return Ok(code);
        }
        let status = self.child.wait().await?;
        Ok(self.record(status))
    }

    /// Stops the process and returns its exit code.
    ///
    /// On Unix, the process group is sent SIGTERM, then SIGKILL if it hasn't exited after
    /// `grace_period`. On Windows, the process is killed immediately.
    pub async fn stop(&mut self, grace_period: Duration) -> io::Result<i32> {
        if let Some(code) = self.poll()? {
            return Ok(code);
        }

        os::terminate(&mut self.child, self.pid);
        tokio::select! {
            status = self.child.wait() => {
                let status = status?;
                Ok(self.record(status))
            }
            () = tokio::time::sleep(grace_period) => {
                debug!(
                    target: "smoke::process",
                    pid = self.pid,
                    "process did not exit within {grace_period:?}, killing it",
                );
                os::kill(&mut self.child, self.pid);
                let status = self.child.wait().await?;
                Ok(self.record(status))
            }
        }
    }

    fn record(&mut self, status: std::process::ExitStatus) -> i32 {
        let code = os::exit_code(status);
        self.exit_code = Some(code);
        code
    }
}
