// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    AdminClient, FIXTURE_HOST, Fixture, FixtureContext, MemberSettings, ReplicaSetFixture,
    STORAGE_ENGINE, ServerConfig, StandaloneFixture,
};
use crate::{
    config::OptionsMap,
    errors::{DisplayErrorChain, FixtureError},
    network::JobPorts,
    runner::JobIndex,
};
use async_trait::async_trait;
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use tracing::{info, warn};

/// The replica set name of the config servers.
pub const CONFIGSVR_REPLSET_NAME: &str = "config-rs";

const CONFIGSVR_NUM_NODES: usize = 3;

/// Configuration for a [`ShardedClusterFixture`].
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct ShardedClusterConfig {
    /// Settings shared by the config servers and the shards.
    #[serde(flatten)]
    pub server: ServerConfig,

    /// The number of shards.
    pub num_shards: usize,

    /// The router executable. Overridden by `--router`.
    pub router_executable: Option<Utf8PathBuf>,

    /// Options passed to the router.
    pub router_options: OptionsMap,

    /// Databases to enable sharding for once the cluster is up.
    pub enable_sharding: Vec<String>,
}

impl Default for ShardedClusterConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            num_shards: 1,
            router_executable: None,
            router_options: OptionsMap::new(),
            enable_sharding: Vec::new(),
        }
    }
}

/// A sharded cluster: a config server replica set, some shards, and a router in front.
///
/// The config servers and shards are started in `setup`. The router needs the config servers'
/// address, so it's started in `await_ready` once they are up; shards are then added through it.
#[derive(Debug)]
pub struct ShardedClusterFixture {
    ports: Arc<JobPorts>,
    admin: Arc<dyn AdminClient>,
    configsvr: ReplicaSetFixture,
    shards: Vec<StandaloneFixture>,
    router: StandaloneFixture,
    enable_sharding: Vec<String>,
}

impl ShardedClusterFixture {
    /// Creates a sharded cluster fixture from the suite configuration.
    pub fn new(
        cx: &FixtureContext<'_>,
        config: &ShardedClusterConfig,
    ) -> Result<Self, FixtureError> {
        if config.server.server_options.contains_key("dbpath") {
            return Err(FixtureError::InvalidOptions {
                fixture: "sharded-cluster",
                message: "cannot specify server-options.dbpath".to_owned(),
            });
        }

        let executable = cx.server_executable(&config.server);
        let dbpath_prefix = cx.data_dir(&config.server);
        let preserve_dbpath = config.server.preserve_dbpath;
        let server_options = cx.server_options(&config.server);

        let mut configsvr_options = server_options.clone();
        configsvr_options.insert("configsvr".to_owned(), "".into());
        configsvr_options.insert("replSet".to_owned(), CONFIGSVR_REPLSET_NAME.into());
        configsvr_options.insert(STORAGE_ENGINE.to_owned(), "wiredTiger".into());
        let configsvr = ReplicaSetFixture::with_members(
            cx,
            MemberSettings {
                label: "config server",
                executable: executable.clone(),
                options: configsvr_options,
                dbpath_prefix: dbpath_prefix.join("config"),
                preserve_dbpath,
                num_nodes: CONFIGSVR_NUM_NODES,
                configsvr: true,
            },
        )?;

        let shards = (0..config.num_shards)
            .map(|index| {
                let label = format!("shard{index}");
                let dbpath = dbpath_prefix.join(&label);
                StandaloneFixture::server(
                    cx,
                    label,
                    executable.clone(),
                    server_options.clone(),
                    dbpath,
                    preserve_dbpath,
                )
            })
            .collect();

        let router = StandaloneFixture::router(
            cx,
            cx.router_executable(config.router_executable.as_deref()),
            config.router_options.clone(),
        );

        Ok(Self {
            ports: cx.ports.clone(),
            admin: cx.admin.clone(),
            configsvr,
            shards,
            router,
            enable_sharding: config.enable_sharding.clone(),
        })
    }

    /// The shards, in order.
    pub fn shards(&self) -> &[StandaloneFixture] {
        &self.shards
    }
}

impl fmt::Display for ShardedClusterFixture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sharded cluster ({})", self.ports.job())
    }
}

#[async_trait]
impl Fixture for ShardedClusterFixture {
    fn job_index(&self) -> JobIndex {
        self.ports.job()
    }

    fn job_ports(&self) -> &JobPorts {
        &self.ports
    }

    fn port(&self) -> Option<u16> {
        self.router.port()
    }

    async fn setup(&mut self) -> Result<(), FixtureError> {
        self.configsvr.setup().await?;
        for shard in &mut self.shards {
            shard.setup().await?;
        }
        Ok(())
    }

    async fn await_ready(&mut self) -> Result<(), FixtureError> {
        self.configsvr.await_ready().await?;
        for shard in &mut self.shards {
            shard.await_ready().await?;
        }

        let configsvr_port = self.configsvr.port().unwrap_or_default();
        self.router.set_option(
            "configdb",
            format!("{CONFIGSVR_REPLSET_NAME}/{FIXTURE_HOST}:{configsvr_port}"),
        );
        self.router.setup().await?;
        self.router.await_ready().await?;

        let router_port = self.router.port().unwrap_or_default();
        for shard in &self.shards {
            let shard_host = shard.internal_connection_string()?;
            info!(target: "smoke::fixture", port = router_port, "adding {shard_host} as a shard");
            self.admin.add_shard(router_port, &shard_host).await?;
        }
        for db in &self.enable_sharding {
            info!(target: "smoke::fixture", port = router_port, "enabling sharding for `{db}`");
            self.admin.enable_sharding(router_port, db).await?;
        }
        Ok(())
    }

    async fn teardown(&mut self) -> Result<bool, FixtureError> {
        if !self.is_running() {
            warn!(
                target: "smoke::fixture",
                "{} was expected to be running in teardown, but wasn't", self,
            );
        }

        let mut clean = match self.configsvr.teardown().await {
            Ok(clean) => clean,
            Err(error) => {
                warn!(
                    target: "smoke::fixture",
                    "failed to stop config servers: {}",
                    DisplayErrorChain::new(&error),
                );
                false
            }
        };
        for node in std::iter::once(&mut self.router).chain(&mut self.shards) {
            match node.teardown().await {
                Ok(node_clean) => clean &= node_clean,
                Err(error) => {
                    warn!(
                        target: "smoke::fixture",
                        "failed to stop {node}: {}",
                        DisplayErrorChain::new(&error),
                    );
                    clean = false;
                }
            }
        }
        Ok(clean)
    }

    fn is_running(&mut self) -> bool {
        self.configsvr.is_running()
            && self.shards.iter_mut().all(|shard| shard.is_running())
            && self.router.is_running()
    }

    fn internal_connection_string(&self) -> Result<String, FixtureError> {
        self.router.internal_connection_string()
    }

    fn driver_connection_url(&self) -> Result<String, FixtureError> {
        self.router.driver_connection_url()
    }
}
