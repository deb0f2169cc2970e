// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    AdminClient, CONNECTION_URL_SCHEME, FIXTURE_HOST, Fixture, FixtureContext, ServerConfig,
};
use crate::{
    config::{OptionsMap, get_port},
    errors::FixtureError,
    helpers::remove_dir_if_exists,
    network::JobPorts,
    process::{DEFAULT_STOP_GRACE_PERIOD, ProcessHandle},
    programs::{router_program, server_program},
    runner::JobIndex,
};
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use serde_json::Value;
use std::{fmt, sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// The default time a server gets to start accepting connections.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(300);

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const PING_TIMEOUT: Duration = Duration::from_millis(500);
const DEFAULT_CHUNK_SIZE: u64 = 50;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum NodeKind {
    Server,
    Router,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => f.write_str("server"),
            Self::Router => f.write_str("router"),
        }
    }
}

/// A single server process.
///
/// Also used for every member of the replicated and sharded fixtures, each with its own label
/// (`primary`, `secondary1`, `shard0`, ...) and data directory.
#[derive(Debug)]
pub struct StandaloneFixture {
    label: String,
    kind: NodeKind,
    ports: Arc<JobPorts>,
    admin: Arc<dyn AdminClient>,
    executable: Utf8PathBuf,
    options: OptionsMap,
    dbpath: Option<Utf8PathBuf>,
    preserve_dbpath: bool,
    port: Option<u16>,
    process: Option<ProcessHandle>,
    ready_timeout: Duration,
}

impl StandaloneFixture {
    /// Creates a standalone server fixture from the suite configuration.
    ///
    /// A `dbpath` in the server options is used as-is, so that a suite can point at existing
    /// data. It cannot be combined with a `dbpath-prefix`.
    pub fn from_config(
        cx: &FixtureContext<'_>,
        config: &ServerConfig,
    ) -> Result<Self, FixtureError> {
        let dbpath = match config.server_options.get("dbpath") {
            Some(_) if config.dbpath_prefix.is_some() => {
                return Err(FixtureError::InvalidOptions {
                    fixture: "standalone",
                    message: "cannot specify both server-options.dbpath and dbpath-prefix"
                        .to_owned(),
                });
            }
            Some(value) => match value.as_str() {
                Some(dbpath) => Utf8PathBuf::from(dbpath),
                None => {
                    return Err(FixtureError::InvalidOptions {
                        fixture: "standalone",
                        message: format!("server-options.dbpath must be a string, found {value}"),
                    });
                }
            },
            None => cx.data_dir(config),
        };

        Ok(Self::server(
            cx,
            "standalone",
            cx.server_executable(config),
            cx.server_options(config),
            dbpath,
            config.preserve_dbpath,
        ))
    }

    /// Creates a server that's a member of a larger fixture.
    pub(crate) fn server(
        cx: &FixtureContext<'_>,
        label: impl Into<String>,
        executable: Utf8PathBuf,
        mut options: OptionsMap,
        dbpath: Utf8PathBuf,
        preserve_dbpath: bool,
    ) -> Self {
        options.shift_remove("dbpath");
        Self::new(
            cx,
            label.into(),
            NodeKind::Server,
            executable,
            options,
            Some(dbpath),
            preserve_dbpath,
        )
    }

    /// Creates a sharding router. `options` must include `configdb`.
    pub(crate) fn router(
        cx: &FixtureContext<'_>,
        executable: Utf8PathBuf,
        mut options: OptionsMap,
    ) -> Self {
        options
            .entry("chunkSize".to_owned())
            .or_insert_with(|| DEFAULT_CHUNK_SIZE.into());
        Self::new(
            cx,
            "router".to_owned(),
            NodeKind::Router,
            executable,
            options,
            None,
            false,
        )
    }

    fn new(
        cx: &FixtureContext<'_>,
        label: String,
        kind: NodeKind,
        executable: Utf8PathBuf,
        options: OptionsMap,
        dbpath: Option<Utf8PathBuf>,
        preserve_dbpath: bool,
    ) -> Self {
        Self {
            label,
            kind,
            ports: cx.ports.clone(),
            admin: cx.admin.clone(),
            executable,
            options,
            dbpath,
            preserve_dbpath,
            port: None,
            process: None,
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }

    /// Sets how long [`await_ready`](Fixture::await_ready) waits for the server to accept
    /// connections.
    pub fn with_ready_timeout(mut self, ready_timeout: Duration) -> Self {
        self.ready_timeout = ready_timeout;
        self
    }

    /// The label used for this process in logs.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The data directory, for servers.
    pub fn dbpath(&self) -> Option<&Utf8Path> {
        self.dbpath.as_deref()
    }

    /// The options the process is (or will be) started with.
    pub fn options(&self) -> &OptionsMap {
        &self.options
    }

    /// Sets an option that's only known once other processes have started, such as a router's
    /// `configdb`. Has no effect on a process that's already running.
    pub(crate) fn set_option(&mut self, key: &str, value: impl Into<Value>) {
        self.options.insert(key.to_owned(), value.into());
    }

    fn require_port(&self) -> Result<u16, FixtureError> {
        self.port.ok_or_else(|| FixtureError::NotApplicable {
            fixture: self.to_string(),
            role: "port (setup has not been called)",
        })
    }

    fn io_error(&self, context: &str, error: std::io::Error) -> FixtureError {
        FixtureError::Io {
            context: format!("{context} for {self}"),
            error,
        }
    }
}

impl fmt::Display for StandaloneFixture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.ports.job())
    }
}

#[async_trait]
impl Fixture for StandaloneFixture {
    fn job_index(&self) -> JobIndex {
        self.ports.job()
    }

    fn job_ports(&self) -> &JobPorts {
        &self.ports
    }

    fn port(&self) -> Option<u16> {
        self.port
    }

    async fn setup(&mut self) -> Result<(), FixtureError> {
        if let Some(dbpath) = self.dbpath.clone() {
            if !self.preserve_dbpath {
                remove_dir_if_exists(&dbpath)
                    .map_err(|error| self.io_error("failed to remove data directory", error))?;
            }
            std::fs::create_dir_all(&dbpath)
                .map_err(|error| self.io_error("failed to create data directory", error))?;
            self.options
                .insert("dbpath".to_owned(), dbpath.as_str().into());
        }

        let port = match get_port(&self.options, "port") {
            Some(port) => port,
            None => {
                let port = self.ports.next_fixture_port()?;
                self.options.insert("port".to_owned(), port.into());
                port
            }
        };
        self.port = Some(port);

        let spec = match self.kind {
            NodeKind::Server => server_program(&self.executable, &self.options),
            NodeKind::Router => router_program(&self.executable, &self.options),
        };
        info!(
            target: "smoke::fixture",
            port,
            "starting {}:\n{}", self,
            spec.as_command(),
        );
        let process = spec.start()?;
        info!(
            target: "smoke::fixture",
            port,
            pid = process.pid(),
            "{} started",
            self.kind,
        );
        self.process = Some(process);
        Ok(())
    }

    async fn await_ready(&mut self) -> Result<(), FixtureError> {
        let port = self.require_port()?;
        let deadline = Instant::now() + self.ready_timeout;

        loop {
            let Some(process) = self.process.as_mut() else {
                return Err(FixtureError::server_failure(format!(
                    "{} has no process to wait for", self
                )));
            };
            match process.poll() {
                Ok(Some(exit_code)) => {
                    return Err(FixtureError::server_failure(format!(
                        "could not connect to {} on port {port}, process ended unexpectedly \
                         with code {exit_code}",
                        self.kind,
                    )));
                }
                Ok(None) => {}
                Err(error) => return Err(self.io_error("failed to check process", error)),
            }

            match self.admin.ping(port, PING_TIMEOUT).await {
                Ok(()) => break,
                Err(error) if error.is_connection() => {
                    if Instant::now() >= deadline {
                        return Err(FixtureError::server_failure(format!(
                            "failed to connect to {} on port {port} after {} seconds",
                            self.kind,
                            self.ready_timeout.as_secs(),
                        )));
                    }
                    debug!(
                        target: "smoke::fixture",
                        port,
                        "waiting to connect to {}: {error}",
                        self.kind,
                    );
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(error) => return Err(error.into()),
            }
        }

        info!(
            target: "smoke::fixture",
            port,
            "successfully contacted {}", self,
        );
        Ok(())
    }

    async fn teardown(&mut self) -> Result<bool, FixtureError> {
        let running_at_start = self.is_running();
        let Some(mut process) = self.process.take() else {
            // Nothing was started, which counts as a clean shutdown.
            return Ok(true);
        };

        if running_at_start {
            info!(
                target: "smoke::fixture",
                port = self.port,
                pid = process.pid(),
                "stopping {}", self,
            );
        } else {
            warn!(
                target: "smoke::fixture",
                port = self.port,
                "{} was expected to be running in teardown, but wasn't", self,
            );
        }

        let exit_code = process
            .stop(DEFAULT_STOP_GRACE_PERIOD)
            .await
            .map_err(|error| self.io_error("failed to stop process", error))?;
        info!(
            target: "smoke::fixture",
            port = self.port,
            exit_code,
            "{} terminated", self,
        );
        Ok(exit_code == 0)
    }

    fn is_running(&mut self) -> bool {
        self.process
            .as_mut()
            .is_some_and(|process| process.is_running())
    }

    fn internal_connection_string(&self) -> Result<String, FixtureError> {
        Ok(format!("{FIXTURE_HOST}:{}", self.require_port()?))
    }

    fn driver_connection_url(&self) -> Result<String, FixtureError> {
        Ok(format!(
            "{CONNECTION_URL_SCHEME}://{}",
            self.internal_connection_string()?
        ))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::{
        config::RunConfig,
        test_helpers::{FakeAdmin, LONG_RUNNING_SERVER, fixture_context, write_script},
    };
    use camino_tempfile::Utf8TempDir;
    use serde_json::json;

    fn server_config(temp: &Utf8TempDir, script: &str) -> ServerConfig {
        ServerConfig {
            server_executable: Some(write_script(temp.path(), "fake-server", script)),
            dbpath_prefix: Some(temp.path().join("db")),
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn lifecycle() {
        let temp = Utf8TempDir::new().expect("created temp dir");
        let run_config = RunConfig::default();
        let admin = FakeAdmin::unreachable_for(2);
        let cx = fixture_context(&run_config, 1, admin.clone());
        let config = server_config(&temp, LONG_RUNNING_SERVER);

        let mut fixture = StandaloneFixture::from_config(&cx, &config).expect("constructed");
        let dbpath = temp.path().join("db/job1/smoke");
        assert_eq!(fixture.dbpath(), Some(dbpath.as_path()));
        std::fs::create_dir_all(&dbpath).expect("created dbpath");
        std::fs::write(dbpath.join("stale"), "").expect("wrote stale file");

        fixture.setup().await.expect("set up");
        assert!(!dbpath.join("stale").exists(), "data directory was wiped");
        assert_eq!(fixture.port(), Some(20250));
        assert_eq!(fixture.options()["dbpath"], json!(dbpath.as_str()));

        fixture.await_ready().await.expect("ready");
        assert_eq!(admin.ping_count(), 3);
        assert!(fixture.is_running());
        assert_eq!(
            fixture.internal_connection_string().expect("has port"),
            "localhost:20250"
        );
        assert_eq!(
            fixture.driver_connection_url().expect("has port"),
            "mongodb://localhost:20250"
        );

        assert!(fixture.teardown().await.expect("torn down"), "clean exit");
        assert!(!fixture.is_running());
    }

    #[tokio::test]
    async fn early_exit_fails_await_ready() {
        let temp = Utf8TempDir::new().expect("created temp dir");
        let run_config = RunConfig::default();
        let cx = fixture_context(&run_config, 0, FakeAdmin::unreachable());
        let config = server_config(&temp, "exit 3");

        let mut fixture = StandaloneFixture::from_config(&cx, &config)
            .expect("constructed")
            .with_ready_timeout(Duration::from_secs(30));
        fixture.setup().await.expect("set up");
        let error = fixture.await_ready().await.expect_err("server exited");
        assert!(
            error.to_string().contains("with code 3"),
            "unexpected error: {error}"
        );
        assert!(!fixture.teardown().await.expect("torn down"), "exit 3 is unclean");
    }

    #[test]
    fn dbpath_and_prefix_conflict() {
        let run_config = RunConfig::default();
        let cx = fixture_context(&run_config, 0, FakeAdmin::healthy());
        let mut config = ServerConfig {
            dbpath_prefix: Some("/prefix".into()),
            ..ServerConfig::default()
        };
        config
            .server_options
            .insert("dbpath".to_owned(), json!("/data/existing"));

        let error = StandaloneFixture::from_config(&cx, &config).expect_err("conflict");
        assert!(matches!(error, FixtureError::InvalidOptions { .. }));

        config.dbpath_prefix = None;
        let fixture = StandaloneFixture::from_config(&cx, &config).expect("dbpath alone is fine");
        assert_eq!(fixture.dbpath(), Some(Utf8Path::new("/data/existing")));
    }

    #[test]
    fn connection_string_requires_setup() {
        let run_config = RunConfig::default();
        let cx = fixture_context(&run_config, 0, FakeAdmin::healthy());
        let fixture =
            StandaloneFixture::from_config(&cx, &ServerConfig::default()).expect("constructed");
        assert!(matches!(
            fixture.internal_connection_string(),
            Err(FixtureError::NotApplicable { .. })
        ));
    }
}
