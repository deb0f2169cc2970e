// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::FIXTURE_HOST;
use crate::{errors::AdminError, process::ProcessSpec};
use async_trait::async_trait;
use camino::Utf8PathBuf;
use serde_json::Value;
use std::{fmt, time::Duration};
use tokio::net::TcpStream;
use tracing::debug;

/// Administrative commands that fixtures issue to the servers they manage.
///
/// Connectivity failures are reported as [`AdminError::Connection`], which callers may retry.
#[async_trait]
pub trait AdminClient: fmt::Debug + Send + Sync {
    /// Checks that the server on `port` accepts commands.
    async fn ping(&self, port: u16, timeout: Duration) -> Result<(), AdminError>;

    /// Returns true if the server on `port` is a replica set primary.
    async fn is_primary(&self, port: u16) -> Result<bool, AdminError>;

    /// Returns true if the server on `port` is a replica set secondary.
    async fn is_secondary(&self, port: u16) -> Result<bool, AdminError>;

    /// Initiates a replica set through the server on `port`.
    async fn initiate(&self, port: u16, config: &Value) -> Result<(), AdminError>;

    /// Adds a shard to the cluster behind the router on `router_port`.
    async fn add_shard(&self, router_port: u16, shard: &str) -> Result<(), AdminError>;

    /// Enables sharding for a database through the router on `router_port`.
    async fn enable_sharding(&self, router_port: u16, db: &str) -> Result<(), AdminError>;

    /// Performs a write on `port` that must be acknowledged by `nodes` nodes within `timeout`.
    async fn replicated_write(
        &self,
        port: u16,
        nodes: usize,
        timeout: Duration,
    ) -> Result<(), AdminError>;
}

/// Exit codes of the snippets run by [`ShellAdminClient`].
mod exit {
    pub(super) const OK: i32 = 0;
    pub(super) const COMMAND_FAILED: i32 = 2;
    pub(super) const FALSE: i32 = 3;
    pub(super) const WRITE_TIMEOUT: i32 = 4;
}

/// An [`AdminClient`] that runs commands through the shell executable.
///
/// Every command first checks that the port accepts TCP connections, then runs
/// `<shell> --quiet --port <port> --eval <snippet>`. The snippet's exit code carries the result:
/// 0 for success, 2 if the server rejected the command, and anything else is treated as a
/// connectivity failure.
#[derive(Clone, Debug)]
pub struct ShellAdminClient {
    shell: Utf8PathBuf,
    command_timeout: Duration,
}

impl ShellAdminClient {
    /// The default time allowed for a single command.
    pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

    /// Creates a new client using the given shell executable.
    pub fn new(shell: impl Into<Utf8PathBuf>) -> Self {
        Self {
            shell: shell.into(),
            command_timeout: Self::DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Sets the time allowed for a single command.
    pub fn with_command_timeout(mut self, command_timeout: Duration) -> Self {
        self.command_timeout = command_timeout;
        self
    }

    async fn probe(&self, port: u16, timeout: Duration) -> Result<(), AdminError> {
        match tokio::time::timeout(timeout, TcpStream::connect((FIXTURE_HOST, port))).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(error)) => Err(AdminError::Connection {
                port,
                reason: error.to_string(),
            }),
            Err(_) => Err(AdminError::Connection {
                port,
                reason: format!("timed out after {timeout:?}"),
            }),
        }
    }

    /// Runs a snippet and returns its exit code, mapping connectivity failures to errors.
    async fn eval(&self, port: u16, snippet: &str, timeout: Duration) -> Result<i32, AdminError> {
        self.probe(port, timeout).await?;

        let mut spec = ProcessSpec::new(&self.shell);
        spec.args(["--quiet", "--port", &port.to_string(), "--eval", snippet]);
        debug!(target: "smoke::fixture", port, "running admin command: {snippet}");
        let mut process = spec
            .start()
            .map_err(|error| AdminError::Spawn { port, error })?;

        let exit_code = match tokio::time::timeout(timeout, process.wait()).await {
            Ok(Ok(exit_code)) => exit_code,
            Ok(Err(error)) => {
                return Err(AdminError::Connection {
                    port,
                    reason: format!("failed to wait for shell: {error}"),
                });
            }
            Err(_) => {
                let _ = process.stop(Duration::from_secs(1)).await;
                return Err(AdminError::Connection {
                    port,
                    reason: format!("shell did not finish within {timeout:?}"),
                });
            }
        };

        match exit_code {
            exit::COMMAND_FAILED => Err(AdminError::CommandFailed {
                port,
                command: snippet.to_owned(),
            }),
            exit::OK | exit::FALSE | exit::WRITE_TIMEOUT => Ok(exit_code),
            other => Err(AdminError::Connection {
                port,
                reason: format!("shell exited with code {other}"),
            }),
        }
    }

    async fn run_command(&self, port: u16, command: &str) -> Result<(), AdminError> {
        let snippet = format!(
            "var res = db.adminCommand({command}); quit(res.ok ? {} : {});",
            exit::OK,
            exit::COMMAND_FAILED,
        );
        self.eval(port, &snippet, self.command_timeout).await?;
        Ok(())
    }

    async fn check(&self, port: u16, expr: &str) -> Result<bool, AdminError> {
        let snippet = format!("quit(({expr}) ? {} : {});", exit::OK, exit::FALSE);
        Ok(self.eval(port, &snippet, self.command_timeout).await? == exit::OK)
    }
}

#[async_trait]
impl AdminClient for ShellAdminClient {
    async fn ping(&self, port: u16, timeout: Duration) -> Result<(), AdminError> {
        let snippet = format!(
            "quit(db.adminCommand({{ping: 1}}).ok ? {} : {});",
            exit::OK,
            exit::COMMAND_FAILED,
        );
        self.eval(port, &snippet, timeout).await?;
        Ok(())
    }

    async fn is_primary(&self, port: u16) -> Result<bool, AdminError> {
        self.check(port, "db.isMaster().ismaster").await
    }

    async fn is_secondary(&self, port: u16) -> Result<bool, AdminError> {
        self.check(port, "db.isMaster().secondary").await
    }

    async fn initiate(&self, port: u16, config: &Value) -> Result<(), AdminError> {
        self.run_command(port, &format!("{{replSetInitiate: {config}}}"))
            .await
    }

    async fn add_shard(&self, router_port: u16, shard: &str) -> Result<(), AdminError> {
        self.run_command(router_port, &format!("{{addShard: {}}}", Value::from(shard)))
            .await
    }

    async fn enable_sharding(&self, router_port: u16, db: &str) -> Result<(), AdminError> {
        self.run_command(router_port, &format!("{{enableSharding: {}}}", Value::from(db)))
            .await
    }

    async fn replicated_write(
        &self,
        port: u16,
        nodes: usize,
        timeout: Duration,
    ) -> Result<(), AdminError> {
        // Errors other than a write-concern timeout are rethrown, so the shell exits with a code
        // that's treated as a connectivity failure and retried.
        let snippet = format!(
            "try {{ \
                db.getSiblingDB('smoke').await_ready.insertOne(\
                    {{awaiting: 'ready'}}, \
                    {{writeConcern: {{w: {nodes}, wtimeout: {wtimeout}}}}}); \
                quit({ok}); \
            }} catch (e) {{ \
                if (e.code === 64 || (e.writeConcernError && e.writeConcernError.code === 64)) \
                    {{ quit({write_timeout}); }} \
                throw e; \
            }}",
            wtimeout = timeout.as_millis(),
            ok = exit::OK,
            write_timeout = exit::WRITE_TIMEOUT,
        );
        // Allow the shell some slack beyond the server-side timeout.
        let exit_code = self
            .eval(port, &snippet, timeout + self.command_timeout)
            .await?;
        if exit_code == exit::WRITE_TIMEOUT {
            return Err(AdminError::WriteTimeout { port, nodes });
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closed_port_is_a_connection_error() {
        // Bind and immediately drop a listener to find a port that's very likely closed.
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).expect("bound");
        let port = listener.local_addr().expect("has address").port();
        drop(listener);

        let client = ShellAdminClient::new("/bin/false");
        let error = client
            .ping(port, Duration::from_millis(500))
            .await
            .expect_err("nothing is listening");
        assert!(error.is_connection(), "unexpected error: {error}");
    }

    #[tokio::test]
    async fn shell_exit_codes_map_to_results() {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
            .await
            .expect("bound");
        let port = listener.local_addr().expect("has address").port();

        // `true` exits 0 for any arguments, `false` exits 1.
        let ok = ShellAdminClient::new("true");
        ok.ping(port, Duration::from_secs(5)).await.expect("ping ok");
        assert!(ok.is_primary(port).await.expect("check ok"));

        let broken = ShellAdminClient::new("false");
        let error = broken
            .ping(port, Duration::from_secs(5))
            .await
            .expect_err("shell failed");
        assert!(error.is_connection(), "unexpected error: {error}");
    }
}
