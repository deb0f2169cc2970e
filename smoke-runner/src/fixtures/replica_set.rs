// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    AdminClient, CONNECTION_URL_SCHEME, Fixture, FixtureContext, QuorumWait, ReplFixture,
    ServerConfig, StandaloneFixture,
};
use crate::{
    config::{OptionsMap, get_str},
    errors::{DisplayErrorChain, FixtureError},
    network::JobPorts,
    runner::JobIndex,
};
use async_trait::async_trait;
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::{fmt, sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// The replica set name used when the server options don't set `replSet`.
pub const DEFAULT_REPLSET_NAME: &str = "rs";

/// Only this many members of a replica set may vote.
const MAX_VOTING_MEMBERS: usize = 7;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for a [`ReplicaSetFixture`].
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct ReplicaSetConfig {
    /// Settings shared by every member.
    #[serde(flatten)]
    pub server: ServerConfig,

    /// The number of members.
    pub num_nodes: usize,
}

impl Default for ReplicaSetConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            num_nodes: 2,
        }
    }
}

/// A replica set.
///
/// Member 0 is always the primary: every other member is configured with priority 0, so it can
/// never be elected.
#[derive(Debug)]
pub struct ReplicaSetFixture {
    label: &'static str,
    ports: Arc<JobPorts>,
    admin: Arc<dyn AdminClient>,
    replset_name: String,
    configsvr: bool,
    nodes: Vec<StandaloneFixture>,
    quorum: QuorumWait,
}

impl ReplicaSetFixture {
    /// Creates a replica set fixture from the suite configuration.
    ///
    /// A `dbpath` in the server options is used as the prefix for the members' data directories.
    pub fn new(cx: &FixtureContext<'_>, config: &ReplicaSetConfig) -> Result<Self, FixtureError> {
        let mut options = cx.server_options(&config.server);
        let dbpath_prefix = match options.shift_remove("dbpath") {
            Some(Value::String(dbpath)) => Utf8PathBuf::from(dbpath),
            Some(other) => {
                return Err(FixtureError::InvalidOptions {
                    fixture: "replica-set",
                    message: format!("server-options.dbpath must be a string, found {other}"),
                });
            }
            None => cx.data_dir(&config.server),
        };

        Self::with_members(
            cx,
            MemberSettings {
                label: "replica set",
                executable: cx.server_executable(&config.server),
                options,
                dbpath_prefix,
                preserve_dbpath: config.server.preserve_dbpath,
                num_nodes: config.num_nodes,
                configsvr: false,
            },
        )
    }

    pub(crate) fn with_members(
        cx: &FixtureContext<'_>,
        settings: MemberSettings,
    ) -> Result<Self, FixtureError> {
        let MemberSettings {
            label,
            executable,
            options,
            dbpath_prefix,
            preserve_dbpath,
            num_nodes,
            configsvr,
        } = settings;

        if num_nodes == 0 {
            return Err(FixtureError::InvalidOptions {
                fixture: "replica-set",
                message: "num-nodes must be at least 1".to_owned(),
            });
        }

        let replset_name = get_str(&options, "replSet")
            .unwrap_or(DEFAULT_REPLSET_NAME)
            .to_owned();
        let nodes = (0..num_nodes)
            .map(|index| {
                let mut node_options = options.clone();
                node_options.insert("replSet".to_owned(), replset_name.as_str().into());
                StandaloneFixture::server(
                    cx,
                    member_label(label, index, num_nodes),
                    executable.clone(),
                    node_options,
                    dbpath_prefix.join(format!("node{index}")),
                    preserve_dbpath,
                )
            })
            .collect();

        Ok(Self {
            label,
            ports: cx.ports.clone(),
            admin: cx.admin.clone(),
            replset_name,
            configsvr,
            nodes,
            quorum: QuorumWait::default(),
        })
    }

    /// Sets the retry policy used while waiting for members.
    pub fn with_quorum_wait(mut self, quorum: QuorumWait) -> Self {
        self.quorum = quorum;
        self
    }

    /// The name of the replica set.
    pub fn replset_name(&self) -> &str {
        &self.replset_name
    }

    /// All members, primary first.
    pub fn nodes(&self) -> &[StandaloneFixture] {
        &self.nodes
    }

    fn not_applicable(&self, role: &'static str) -> FixtureError {
        FixtureError::NotApplicable {
            fixture: self.to_string(),
            role,
        }
    }

    fn hosts(&self) -> Result<Vec<String>, FixtureError> {
        self.nodes
            .iter()
            .map(|node| node.internal_connection_string())
            .collect()
    }

    async fn await_member(&self, port: u16, role: MemberRole) -> Result<(), FixtureError> {
        let deadline = Instant::now() + self.quorum.window();
        loop {
            let result = match role {
                MemberRole::Primary => self.admin.is_primary(port).await,
                MemberRole::Secondary => self.admin.is_secondary(port).await,
            };
            match result {
                Ok(true) => break,
                Ok(false) => {}
                Err(error) if error.is_connection() => {
                    debug!(target: "smoke::fixture", port, "{role} not reachable yet: {error}");
                }
                Err(error) => return Err(error.into()),
            }
            if Instant::now() >= deadline {
                return Err(FixtureError::server_failure(format!(
                    "{role} on port {port} was not available after {} seconds",
                    self.quorum.window().as_secs(),
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        info!(target: "smoke::fixture", port, "{role} on port {port} is available");
        Ok(())
    }
}

/// How to build the members of a replica set.
#[derive(Debug)]
pub(crate) struct MemberSettings {
    pub(crate) label: &'static str,
    pub(crate) executable: Utf8PathBuf,
    pub(crate) options: OptionsMap,
    pub(crate) dbpath_prefix: Utf8PathBuf,
    pub(crate) preserve_dbpath: bool,
    pub(crate) num_nodes: usize,
    pub(crate) configsvr: bool,
}

#[derive(Clone, Copy, Debug)]
enum MemberRole {
    Primary,
    Secondary,
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::Secondary => f.write_str("secondary"),
        }
    }
}

fn member_label(fixture: &str, index: usize, num_nodes: usize) -> String {
    match index {
        0 => format!("{fixture} primary"),
        // With a single secondary there's no need to number it.
        _ if num_nodes <= 2 => format!("{fixture} secondary"),
        _ => format!("{fixture} secondary{}", index - 1),
    }
}

/// Builds the `replSetInitiate` document for members on `hosts`, in order.
pub(crate) fn initiate_config(replset_name: &str, hosts: &[String], configsvr: bool) -> Value {
    let members: Vec<Value> = hosts
        .iter()
        .enumerate()
        .map(|(index, host)| {
            let mut member = json!({ "_id": index, "host": host });
            if index > 0 {
                member["priority"] = json!(0);
            }
            if index >= MAX_VOTING_MEMBERS {
                member["votes"] = json!(0);
            }
            member
        })
        .collect();

    let mut config = json!({ "_id": replset_name, "members": members });
    if configsvr {
        config["configsvr"] = json!(true);
    }
    config
}

impl fmt::Display for ReplicaSetFixture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.ports.job())
    }
}

#[async_trait]
impl Fixture for ReplicaSetFixture {
    fn job_index(&self) -> JobIndex {
        self.ports.job()
    }

    fn job_ports(&self) -> &JobPorts {
        &self.ports
    }

    fn port(&self) -> Option<u16> {
        self.nodes.first().and_then(|node| node.port())
    }

    async fn setup(&mut self) -> Result<(), FixtureError> {
        for node in &mut self.nodes {
            node.setup().await?;
        }
        // Wait for every member before initiating so the election starts as soon as possible.
        for node in &mut self.nodes {
            node.await_ready().await?;
        }

        let primary_port = self.primary()?.port().unwrap_or_default();
        let config = initiate_config(&self.replset_name, &self.hosts()?, self.configsvr);
        info!(
            target: "smoke::fixture",
            port = primary_port,
            "initiating {}: {config}", self,
        );
        self.admin.initiate(primary_port, &config).await?;
        Ok(())
    }

    async fn await_ready(&mut self) -> Result<(), FixtureError> {
        let primary_port = self.primary()?.port().unwrap_or_default();
        self.await_member(primary_port, MemberRole::Primary).await?;

        let secondary_ports: Vec<_> = self
            .secondaries()?
            .iter()
            .filter_map(|node| node.port())
            .collect();
        for port in secondary_ports {
            self.await_member(port, MemberRole::Secondary).await?;
        }
        Ok(())
    }

    async fn teardown(&mut self) -> Result<bool, FixtureError> {
        if self.is_running() {
            info!(target: "smoke::fixture", "stopping all members of {}", self);
        } else {
            warn!(
                target: "smoke::fixture",
                "{} was expected to be running in teardown, but wasn't", self,
            );
        }

        // Secondaries go first to reduce noise from the primary.
        let mut clean = true;
        for node in self.nodes.iter_mut().rev() {
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
        self.nodes.iter_mut().all(|node| node.is_running())
    }

    fn internal_connection_string(&self) -> Result<String, FixtureError> {
        Ok(format!("{}/{}", self.replset_name, self.hosts()?.join(",")))
    }

    fn driver_connection_url(&self) -> Result<String, FixtureError> {
        Ok(format!(
            "{CONNECTION_URL_SCHEME}://{}/?replicaSet={}",
            self.hosts()?.join(","),
            self.replset_name,
        ))
    }

    fn as_repl(&self) -> Option<&dyn ReplFixture> {
        Some(self)
    }
}

impl ReplFixture for ReplicaSetFixture {
    fn primary(&self) -> Result<&StandaloneFixture, FixtureError> {
        match self.nodes.first() {
            Some(node) if node.port().is_some() => Ok(node),
            _ => Err(self.not_applicable("primary")),
        }
    }

    fn secondaries(&self) -> Result<Vec<&StandaloneFixture>, FixtureError> {
        // Members are all set up together, so the primary stands in for the rest.
        self.primary()?;
        Ok(self.nodes.iter().skip(1).collect())
    }

    fn quorum_wait(&self) -> &QuorumWait {
        &self.quorum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::RunConfig, test_helpers::{FakeAdmin, fixture_context}};
    use pretty_assertions::assert_eq;

    #[test]
    fn initiate_config_priorities_and_votes() {
        let hosts: Vec<_> = (0..9).map(|i| format!("localhost:{}", 20000 + i)).collect();
        let config = initiate_config("rs", &hosts, false);

        let members = config["members"].as_array().expect("members array");
        assert_eq!(members.len(), 9);
        assert_eq!(members[0], json!({ "_id": 0, "host": "localhost:20000" }));
        assert_eq!(
            members[1],
            json!({ "_id": 1, "host": "localhost:20001", "priority": 0 })
        );
        assert_eq!(members[6].get("votes"), None);
        assert_eq!(members[7]["votes"], json!(0));
        assert_eq!(members[8]["votes"], json!(0));
        assert_eq!(config.get("configsvr"), None);

        let config = initiate_config("config-rs", &hosts[..1], true);
        assert_eq!(config["configsvr"], json!(true));
    }

    #[test]
    fn member_labels() {
        assert_eq!(member_label("replica set", 0, 2), "replica set primary");
        assert_eq!(member_label("replica set", 1, 2), "replica set secondary");
        assert_eq!(member_label("replica set", 2, 3), "replica set secondary1");
    }

    #[test]
    fn roles_need_setup() {
        let run_config = RunConfig::default();
        let cx = fixture_context(&run_config, 0, FakeAdmin::healthy());
        let fixture = ReplicaSetFixture::new(&cx, &ReplicaSetConfig::default()).expect("built");

        assert_eq!(fixture.nodes().len(), 2);
        assert_eq!(fixture.replset_name(), DEFAULT_REPLSET_NAME);
        assert!(matches!(
            fixture.primary(),
            Err(FixtureError::NotApplicable { role: "primary", .. })
        ));
        assert!(fixture.secondaries().is_err());
        assert!(fixture.internal_connection_string().is_err());
    }

    #[test]
    fn zero_nodes_is_invalid() {
        let run_config = RunConfig::default();
        let cx = fixture_context(&run_config, 0, FakeAdmin::healthy());
        let config = ReplicaSetConfig {
            num_nodes: 0,
            ..ReplicaSetConfig::default()
        };
        assert!(matches!(
            ReplicaSetFixture::new(&cx, &config),
            Err(FixtureError::InvalidOptions { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn lifecycle() {
        use crate::test_helpers::{LONG_RUNNING_SERVER, write_script};
        use camino_tempfile::Utf8TempDir;

        let temp = Utf8TempDir::new().expect("created temp dir");
        let run_config = RunConfig::default();
        let admin = FakeAdmin::healthy();
        let cx = fixture_context(&run_config, 0, admin.clone());
        let config = ReplicaSetConfig {
            server: ServerConfig {
                server_executable: Some(write_script(
                    temp.path(),
                    "fake-server",
                    LONG_RUNNING_SERVER,
                )),
                dbpath_prefix: Some(temp.path().to_owned()),
                ..ServerConfig::default()
            },
            num_nodes: 3,
        };

        let mut fixture = ReplicaSetFixture::new(&cx, &config).expect("built");
        fixture.setup().await.expect("set up");
        assert!(temp.path().join("job0/smoke/node2").is_dir());
        assert_eq!(fixture.port(), Some(20000));
        assert_eq!(
            fixture.internal_connection_string().expect("set up"),
            "rs/localhost:20000,localhost:20001,localhost:20002"
        );
        assert_eq!(
            fixture.driver_connection_url().expect("set up"),
            "mongodb://localhost:20000,localhost:20001,localhost:20002/?replicaSet=rs"
        );
        assert_eq!(
            admin.calls(),
            vec!["initiate 20000 rs".to_owned()],
            "replica set initiated through the primary"
        );

        fixture.await_ready().await.expect("ready");
        let repl = fixture.as_repl().expect("is replicated");
        assert_eq!(repl.primary().expect("primary").port(), Some(20000));
        assert_eq!(repl.secondaries().expect("secondaries").len(), 2);
        assert!(fixture.is_running());

        assert!(fixture.teardown().await.expect("torn down"));
        assert!(!fixture.is_running());
    }
}
