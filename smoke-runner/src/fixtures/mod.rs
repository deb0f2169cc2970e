// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fixtures: the server deployments that tests run against.
//!
//! Each job owns exactly one fixture for the lifetime of a test group. A fixture goes through the
//! phases described by [`FixturePhase`]; [`ManagedFixture`] enforces them.

mod admin;
mod noop;
mod quorum;
mod replica_set;
mod master_slave;
mod sharded;
mod standalone;

pub use admin::*;
pub use master_slave::*;
pub use noop::*;
pub use quorum::*;
pub use replica_set::*;
pub use sharded::*;
pub use standalone::*;

use crate::{
    config::{FIXTURE_SUBDIR, LayeredOptions, OptionsMap, RunConfig, default_executables},
    errors::{FixtureError, UnknownFixtureClassError},
    network::JobPorts,
    runner::JobIndex,
};
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc};

/// The scheme of driver connection URLs.
pub const CONNECTION_URL_SCHEME: &str = "mongodb";

/// The server option selecting a storage engine.
pub const STORAGE_ENGINE: &str = "storageEngine";

/// The host fixtures listen on and are reached through.
pub const FIXTURE_HOST: &str = "localhost";

/// A deployment of server processes that tests run against.
///
/// Methods are called in the order `setup`, `await_ready`, then any number of test executions,
/// then `teardown`. [`ManagedFixture`] checks this order.
#[async_trait]
pub trait Fixture: fmt::Debug + fmt::Display + Send + Sync {
    /// The job this fixture belongs to.
    fn job_index(&self) -> JobIndex;

    /// The ports owned by this fixture's job.
    fn job_ports(&self) -> &JobPorts;

    /// The port tests should connect to, once the fixture has been set up. `None` for fixtures
    /// that don't start a server.
    fn port(&self) -> Option<u16>;

    /// Starts the fixture's processes. Does not wait for them to be usable.
    async fn setup(&mut self) -> Result<(), FixtureError>;

    /// Blocks until the fixture is usable.
    async fn await_ready(&mut self) -> Result<(), FixtureError>;

    /// Stops the fixture's processes. Returns true if every process exited cleanly.
    async fn teardown(&mut self) -> Result<bool, FixtureError>;

    /// Returns true if every process of the fixture is still running.
    fn is_running(&mut self) -> bool;

    /// A connection string for use by test programs that take one (`host:port`, or
    /// `setname/host1:port1,host2:port2` for replica sets).
    fn internal_connection_string(&self) -> Result<String, FixtureError>;

    /// A URL for use by drivers, such as the shell's `connect` or a language driver.
    fn driver_connection_url(&self) -> Result<String, FixtureError>;

    /// Returns this fixture as a replicated fixture, if it is one.
    fn as_repl(&self) -> Option<&dyn ReplFixture> {
        None
    }
}

/// A fixture with a primary and secondaries.
pub trait ReplFixture: Fixture {
    /// Returns the primary node.
    fn primary(&self) -> Result<&StandaloneFixture, FixtureError>;

    /// Returns the secondary nodes.
    fn secondaries(&self) -> Result<Vec<&StandaloneFixture>, FixtureError>;

    /// Returns the retry policy used for replicated operations.
    fn quorum_wait(&self) -> &QuorumWait;
}

/// The phases of a fixture's life.
///
/// ```text
/// Created -> SettingUp -> Ready -> Running -> TearingDown -> Stopped
/// ```
///
/// Teardown may start from `SettingUp` or `Ready` too, when setup fails partway.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FixturePhase {
    /// Constructed, nothing started.
    Created,

    /// `setup` has been called.
    SettingUp,

    /// `await_ready` returned successfully.
    Ready,

    /// Tests are being run against the fixture.
    Running,

    /// `teardown` has been called.
    TearingDown,

    /// `teardown` has finished.
    Stopped,
}

impl fmt::Display for FixturePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::SettingUp => "setting up",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::TearingDown => "tearing down",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// A fixture along with its current phase.
///
/// Out-of-order calls are programming errors and panic.
#[derive(Debug)]
pub struct ManagedFixture {
    fixture: Box<dyn Fixture>,
    phase: FixturePhase,
}

impl ManagedFixture {
    /// Wraps a freshly constructed fixture.
    pub fn new(fixture: Box<dyn Fixture>) -> Self {
        Self {
            fixture,
            phase: FixturePhase::Created,
        }
    }

    /// Returns the current phase.
    pub fn phase(&self) -> FixturePhase {
        self.phase
    }

    /// Returns the fixture.
    pub fn fixture(&self) -> &dyn Fixture {
        &*self.fixture
    }

    /// Calls [`Fixture::setup`].
    pub async fn setup(&mut self) -> Result<(), FixtureError> {
        self.transition(&[FixturePhase::Created], FixturePhase::SettingUp);
        self.fixture.setup().await
    }

    /// Calls [`Fixture::await_ready`].
    pub async fn await_ready(&mut self) -> Result<(), FixtureError> {
        self.check(&[FixturePhase::SettingUp], "await_ready");
        self.fixture.await_ready().await?;
        self.phase = FixturePhase::Ready;
        Ok(())
    }

    /// Marks the fixture as having tests run against it.
    pub fn begin_tests(&mut self) {
        self.transition(
            &[FixturePhase::Ready, FixturePhase::Running],
            FixturePhase::Running,
        );
    }

    /// Calls [`Fixture::teardown`].
    pub async fn teardown(&mut self) -> Result<bool, FixtureError> {
        self.transition(
            &[
                FixturePhase::SettingUp,
                FixturePhase::Ready,
                FixturePhase::Running,
            ],
            FixturePhase::TearingDown,
        );
        let result = self.fixture.teardown().await;
        self.phase = FixturePhase::Stopped;
        result
    }

    /// Calls [`Fixture::is_running`]. A fixture that hasn't been set up isn't running.
    pub fn is_running(&mut self) -> bool {
        match self.phase {
            FixturePhase::Created | FixturePhase::Stopped => false,
            _ => self.fixture.is_running(),
        }
    }

    fn check(&self, from: &[FixturePhase], operation: &str) {
        if !from.contains(&self.phase) {
            panic!(
                "illegal state transition: {operation}() called on {} while {}",
                self.fixture, self.phase
            );
        }
    }

    fn transition(&mut self, from: &[FixturePhase], to: FixturePhase) {
        if !from.contains(&self.phase) {
            panic!(
                "illegal state transition: {} -> {to} for {}",
                self.phase, self.fixture
            );
        }
        self.phase = to;
    }
}

/// The kinds of fixture a suite can ask for.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum FixtureClass {
    /// No processes at all.
    #[default]
    Noop,

    /// A single server.
    Standalone,

    /// A replica set.
    ReplicaSet,

    /// A master and a slave.
    MasterSlave,

    /// A sharded cluster behind a router.
    ShardedCluster,
}

impl FixtureClass {
    /// Returns the string used for this class in suite files.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Noop => "noop",
            Self::Standalone => "standalone",
            Self::ReplicaSet => "replica-set",
            Self::MasterSlave => "master-slave",
            Self::ShardedCluster => "sharded-cluster",
        }
    }
}

impl FromStr for FixtureClass {
    type Err = UnknownFixtureClassError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Self::Noop,
            Self::Standalone,
            Self::ReplicaSet,
            Self::MasterSlave,
            Self::ShardedCluster,
        ]
        .into_iter()
        .find(|class| class.as_str() == s)
        .ok_or_else(|| UnknownFixtureClassError::new(s))
    }
}

impl fmt::Display for FixtureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `[executor.<kind>.fixture]` section of a suite file.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(tag = "class", rename_all = "kebab-case")]
pub enum FixtureConfig {
    /// See [`NoopFixture`].
    #[default]
    Noop,

    /// See [`StandaloneFixture`].
    Standalone(ServerConfig),

    /// See [`ReplicaSetFixture`].
    ReplicaSet(ReplicaSetConfig),

    /// See [`MasterSlaveFixture`].
    MasterSlave(MasterSlaveConfig),

    /// See [`ShardedClusterFixture`].
    ShardedCluster(ShardedClusterConfig),
}

impl FixtureConfig {
    /// Returns the class of fixture this config builds.
    pub fn class(&self) -> FixtureClass {
        match self {
            Self::Noop => FixtureClass::Noop,
            Self::Standalone(_) => FixtureClass::Standalone,
            Self::ReplicaSet(_) => FixtureClass::ReplicaSet,
            Self::MasterSlave(_) => FixtureClass::MasterSlave,
            Self::ShardedCluster(_) => FixtureClass::ShardedCluster,
        }
    }

    /// Constructs a fixture for one job. Nothing is started until [`Fixture::setup`].
    pub fn build(&self, cx: &FixtureContext<'_>) -> Result<Box<dyn Fixture>, FixtureError> {
        Ok(match self {
            Self::Noop => Box::new(NoopFixture::new(cx)),
            Self::Standalone(config) => Box::new(StandaloneFixture::from_config(cx, config)?),
            Self::ReplicaSet(config) => Box::new(ReplicaSetFixture::new(cx, config)?),
            Self::MasterSlave(config) => Box::new(MasterSlaveFixture::new(cx, config)?),
            Self::ShardedCluster(config) => Box::new(ShardedClusterFixture::new(cx, config)?),
        })
    }
}

/// Settings shared by every fixture that starts servers.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct ServerConfig {
    /// The server executable. Overridden by `--server`.
    pub server_executable: Option<Utf8PathBuf>,

    /// Options passed to every server.
    pub server_options: OptionsMap,

    /// The prefix of data directories. Overridden by `--dbpath-prefix`.
    pub dbpath_prefix: Option<Utf8PathBuf>,

    /// Keep existing data directories rather than wiping them at setup.
    pub preserve_dbpath: bool,
}

/// What a fixture needs from its job and from the run.
#[derive(Clone, Debug)]
pub struct FixtureContext<'a> {
    /// The ports owned by the job.
    pub ports: Arc<JobPorts>,

    /// The client used for administrative commands.
    pub admin: Arc<dyn AdminClient>,

    /// The run-wide settings.
    pub run_config: &'a RunConfig,
}

impl FixtureContext<'_> {
    /// Returns the job index.
    pub fn job(&self) -> JobIndex {
        self.ports.job()
    }

    /// Returns the server executable: the command line wins over the suite file.
    pub fn server_executable(&self, config: &ServerConfig) -> Utf8PathBuf {
        self.run_config
            .executables
            .server
            .clone()
            .or_else(|| config.server_executable.clone())
            .unwrap_or_else(|| default_executables::SERVER.into())
    }

    /// Returns the options for every server, with command-line overrides applied.
    pub fn server_options(&self, config: &ServerConfig) -> OptionsMap {
        LayeredOptions::new(OptionsMap::new())
            .suite(&config.server_options)
            .command_line(
                STORAGE_ENGINE,
                self.run_config.storage_engine.as_deref().map(Into::into),
            )
            .merge()
    }

    /// Returns the router executable: the command line wins over the suite file.
    pub fn router_executable(&self, suite_value: Option<&Utf8Path>) -> Utf8PathBuf {
        self.run_config
            .executables
            .router
            .clone()
            .or_else(|| suite_value.map(ToOwned::to_owned))
            .unwrap_or_else(|| default_executables::ROUTER.into())
    }

    /// Returns the directory this job's fixture keeps its data in: `<prefix>/job<N>/smoke`.
    pub fn data_dir(&self, config: &ServerConfig) -> Utf8PathBuf {
        self.run_config
            .dbpath_prefix_or(config.dbpath_prefix.as_deref())
            .join(self.job().dir_name())
            .join(FIXTURE_SUBDIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{FakeAdmin, fixture_context};
    use test_case::test_case;

    #[test_case("noop", FixtureClass::Noop)]
    #[test_case("replica-set", FixtureClass::ReplicaSet)]
    #[test_case("sharded-cluster", FixtureClass::ShardedCluster)]
    fn class_round_trips(input: &str, class: FixtureClass) {
        assert_eq!(input.parse::<FixtureClass>().expect("known class"), class);
        assert_eq!(class.to_string(), input);
    }

    #[test]
    fn unknown_class() {
        assert!("cluster".parse::<FixtureClass>().is_err());
    }

    #[tokio::test]
    async fn managed_fixture_phases() {
        let run_config = RunConfig::default();
        let cx = fixture_context(&run_config, 0, FakeAdmin::healthy());
        let mut fixture = ManagedFixture::new(FixtureConfig::Noop.build(&cx).expect("built"));
        assert_eq!(fixture.phase(), FixturePhase::Created);
        assert!(!fixture.is_running());

        fixture.setup().await.expect("set up");
        fixture.await_ready().await.expect("ready");
        assert_eq!(fixture.phase(), FixturePhase::Ready);
        fixture.begin_tests();
        fixture.begin_tests();
        assert_eq!(fixture.phase(), FixturePhase::Running);
        assert!(fixture.is_running());

        assert!(fixture.teardown().await.expect("torn down"));
        assert_eq!(fixture.phase(), FixturePhase::Stopped);
        assert!(!fixture.is_running());
    }

    #[tokio::test]
    #[should_panic = "illegal state transition"]
    async fn await_ready_before_setup_panics() {
        let run_config = RunConfig::default();
        let cx = fixture_context(&run_config, 0, FakeAdmin::healthy());
        let mut fixture = ManagedFixture::new(FixtureConfig::Noop.build(&cx).expect("built"));
        let _ = fixture.await_ready().await;
    }

    #[test]
    fn data_dir_layout() {
        let run_config = RunConfig {
            dbpath_prefix: Some("/scratch".into()),
            ..RunConfig::default()
        };
        let cx = fixture_context(&run_config, 3, FakeAdmin::healthy());
        let config = ServerConfig {
            dbpath_prefix: Some("/ignored".into()),
            ..ServerConfig::default()
        };
        assert_eq!(cx.data_dir(&config), "/scratch/job3/smoke");
    }

    #[test]
    fn command_line_storage_engine_wins() {
        let run_config = RunConfig {
            storage_engine: Some("inMemory".to_owned()),
            ..RunConfig::default()
        };
        let cx = fixture_context(&run_config, 0, FakeAdmin::healthy());
        let mut config = ServerConfig::default();
        config
            .server_options
            .insert(STORAGE_ENGINE.to_owned(), "wiredTiger".into());
        config.server_options.insert("nojournal".to_owned(), "".into());

        let options = cx.server_options(&config);
        assert_eq!(options[STORAGE_ENGINE], "inMemory");
        assert_eq!(options["nojournal"], "");
    }
}
