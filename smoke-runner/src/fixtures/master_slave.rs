// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    AdminClient, Fixture, FixtureContext, QuorumWait, ReplFixture, ServerConfig,
    StandaloneFixture,
};
use crate::{
    config::OptionsMap,
    errors::{AdminError, DisplayErrorChain, FixtureError},
    network::JobPorts,
    runner::JobIndex,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use tracing::{info, warn};

/// Configuration for a [`MasterSlaveFixture`].
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct MasterSlaveConfig {
    /// Settings shared by both servers.
    #[serde(flatten)]
    pub server: ServerConfig,

    /// Options for the master only, applied over `server-options`.
    pub master_options: OptionsMap,

    /// Options for the slave only, applied over `server-options`.
    pub slave_options: OptionsMap,
}

/// A master and a slave replicating from it.
#[derive(Debug)]
pub struct MasterSlaveFixture {
    ports: Arc<JobPorts>,
    admin: Arc<dyn AdminClient>,
    master: StandaloneFixture,
    slave: StandaloneFixture,
    quorum: QuorumWait,
}

impl MasterSlaveFixture {
    /// Creates a master/slave fixture from the suite configuration.
    pub fn new(cx: &FixtureContext<'_>, config: &MasterSlaveConfig) -> Result<Self, FixtureError> {
        if config.server.server_options.contains_key("dbpath") {
            return Err(FixtureError::InvalidOptions {
                fixture: "master-slave",
                message: "cannot specify server-options.dbpath".to_owned(),
            });
        }

        let executable = cx.server_executable(&config.server);
        let dbpath_prefix = cx.data_dir(&config.server);
        let server_options = cx.server_options(&config.server);
        let node = |label: &str, role_options: &OptionsMap, role_flag: &str| {
            let mut options = server_options.clone();
            options.extend(role_options.clone());
            options.insert(role_flag.to_owned(), "".into());
            StandaloneFixture::server(
                cx,
                label,
                executable.clone(),
                options,
                dbpath_prefix.join(label),
                config.server.preserve_dbpath,
            )
        };

        Ok(Self {
            ports: cx.ports.clone(),
            admin: cx.admin.clone(),
            master: node("master", &config.master_options, "master"),
            slave: node("slave", &config.slave_options, "slave"),
            quorum: QuorumWait::default(),
        })
    }

    /// Sets the retry policy used for the replicated write in `await_ready`.
    pub fn with_quorum_wait(mut self, quorum: QuorumWait) -> Self {
        self.quorum = quorum;
        self
    }
}

impl fmt::Display for MasterSlaveFixture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "master/slave ({})", self.ports.job())
    }
}

#[async_trait]
impl Fixture for MasterSlaveFixture {
    fn job_index(&self) -> JobIndex {
        self.ports.job()
    }

    fn job_ports(&self) -> &JobPorts {
        &self.ports
    }

    fn port(&self) -> Option<u16> {
        self.master.port()
    }

    async fn setup(&mut self) -> Result<(), FixtureError> {
        self.master.setup().await?;
        let source = self.master.internal_connection_string()?;
        self.slave.set_option("source", source);
        self.slave.setup().await
    }

    async fn await_ready(&mut self) -> Result<(), FixtureError> {
        self.master.await_ready().await?;
        self.slave.await_ready().await?;

        // A write acknowledged by both servers means the slave has finished its initial sync.
        let port = self.primary()?.port().unwrap_or_default();
        let admin = &*self.admin;
        let result = self
            .quorum
            .retry_until_wtimeout(port, |remaining| {
                admin.replicated_write(port, 2, remaining)
            })
            .await;
        if let Err(FixtureError::Admin(AdminError::WriteTimeout { .. })) = &result {
            info!(target: "smoke::fixture", port, "replication of write operation timed out");
        }
        result
    }

    async fn teardown(&mut self) -> Result<bool, FixtureError> {
        if !self.is_running() {
            warn!(
                target: "smoke::fixture",
                "{} was expected to be running in teardown, but wasn't", self,
            );
        }

        let mut clean = true;
        for node in [&mut self.slave, &mut self.master] {
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
        self.master.is_running() && self.slave.is_running()
    }

    fn internal_connection_string(&self) -> Result<String, FixtureError> {
        self.master.internal_connection_string()
    }

    fn driver_connection_url(&self) -> Result<String, FixtureError> {
        self.master.driver_connection_url()
    }

    fn as_repl(&self) -> Option<&dyn ReplFixture> {
        Some(self)
    }
}

impl ReplFixture for MasterSlaveFixture {
    fn primary(&self) -> Result<&StandaloneFixture, FixtureError> {
        if self.master.port().is_none() {
            return Err(FixtureError::NotApplicable {
                fixture: self.to_string(),
                role: "master",
            });
        }
        Ok(&self.master)
    }

    fn secondaries(&self) -> Result<Vec<&StandaloneFixture>, FixtureError> {
        if self.slave.port().is_none() {
            return Err(FixtureError::NotApplicable {
                fixture: self.to_string(),
                role: "slave",
            });
        }
        Ok(vec![&self.slave])
    }

    fn quorum_wait(&self) -> &QuorumWait {
        &self.quorum
    }
}
