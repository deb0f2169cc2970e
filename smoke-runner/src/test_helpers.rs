// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fakes shared by unit tests.

use crate::{
    config::RunConfig,
    errors::{AdminError, FixtureError},
    fixtures::{AdminClient, CONNECTION_URL_SCHEME, FIXTURE_HOST, Fixture, FixtureContext},
    network::{JobPorts, PortAllocator},
    runner::JobIndex,
};
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use serde_json::Value;
use std::{
    fmt,
    num::NonZeroUsize,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

/// A fake server: exits cleanly on SIGTERM, otherwise runs forever.
pub(crate) const LONG_RUNNING_SERVER: &str = "trap 'exit 0' TERM\nwhile :; do sleep 0.1; done";

/// An [`AdminClient`] that never talks to a server.
#[derive(Debug, Default)]
pub(crate) struct FakeAdmin {
    unreachable: bool,
    ping_failures: AtomicUsize,
    write_failures: AtomicUsize,
    pings: AtomicUsize,
    writes: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl FakeAdmin {
    pub(crate) fn healthy() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every ping fails with a connection error.
    pub(crate) fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            unreachable: true,
            ..Self::default()
        })
    }

    /// The first `failures` pings fail with a connection error.
    pub(crate) fn unreachable_for(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            ping_failures: AtomicUsize::new(failures),
            ..Self::default()
        })
    }

    /// The first `failures` replicated writes fail with a connection error.
    pub(crate) fn flaky_writes(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            write_failures: AtomicUsize::new(failures),
            ..Self::default()
        })
    }

    pub(crate) fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub(crate) fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Administrative commands other than pings and writes, in the order they were issued.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("lock not poisoned").clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().expect("lock not poisoned").push(call);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn connection_error(port: u16) -> AdminError {
    AdminError::Connection {
        port,
        reason: "connection refused".to_owned(),
    }
}

#[async_trait]
impl AdminClient for FakeAdmin {
    async fn ping(&self, port: u16, _timeout: Duration) -> Result<(), AdminError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if self.unreachable || Self::take_failure(&self.ping_failures) {
            return Err(connection_error(port));
        }
        Ok(())
    }

    async fn is_primary(&self, _port: u16) -> Result<bool, AdminError> {
        Ok(true)
    }

    async fn is_secondary(&self, _port: u16) -> Result<bool, AdminError> {
        Ok(true)
    }

    async fn initiate(&self, port: u16, config: &Value) -> Result<(), AdminError> {
        let name = config["_id"].as_str().unwrap_or_default();
        self.record(format!("initiate {port} {name}"));
        Ok(())
    }

    async fn add_shard(&self, router_port: u16, shard: &str) -> Result<(), AdminError> {
        self.record(format!("add_shard {router_port} {shard}"));
        Ok(())
    }

    async fn enable_sharding(&self, router_port: u16, db: &str) -> Result<(), AdminError> {
        self.record(format!("enable_sharding {router_port} {db}"));
        Ok(())
    }

    async fn replicated_write(
        &self,
        port: u16,
        _nodes: usize,
        _timeout: Duration,
    ) -> Result<(), AdminError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.write_failures) {
            return Err(connection_error(port));
        }
        Ok(())
    }
}

/// Builds a fixture context for `job`, with enough jobs allocated for it to exist.
pub(crate) fn fixture_context(
    run_config: &RunConfig,
    job: usize,
    admin: Arc<dyn AdminClient>,
) -> FixtureContext<'_> {
    FixtureContext {
        ports: Arc::new(job_ports(run_config, job)),
        admin,
        run_config,
    }
}

pub(crate) fn job_ports(run_config: &RunConfig, job: usize) -> JobPorts {
    let job_count = NonZeroUsize::new(job + 1).expect("job + 1 is nonzero");
    PortAllocator::new(run_config.base_port, job_count)
        .and_then(|allocator| allocator.job_ports(JobIndex::new(job)))
        .expect("ports fit for test job")
}

/// A fixture that pretends to listen on a port without starting anything.
#[derive(Debug)]
pub(crate) struct FakeFixture {
    ports: JobPorts,
    port: Option<u16>,
    checks_until_crash: usize,
}

impl FakeFixture {
    pub(crate) fn new(run_config: &RunConfig, job: usize, port: Option<u16>) -> Self {
        Self {
            ports: job_ports(run_config, job),
            port,
            checks_until_crash: usize::MAX,
        }
    }

    /// Reports a crash from the liveness check after `checks` successful ones.
    pub(crate) fn crash_after(mut self, checks: usize) -> Self {
        self.checks_until_crash = checks;
        self
    }

    fn require_port(&self) -> Result<u16, FixtureError> {
        self.port.ok_or_else(|| FixtureError::NotApplicable {
            fixture: self.to_string(),
            role: "port",
        })
    }
}

impl fmt::Display for FakeFixture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fake fixture ({})", self.ports.job())
    }
}

#[async_trait]
impl Fixture for FakeFixture {
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
        Ok(())
    }

    async fn await_ready(&mut self) -> Result<(), FixtureError> {
        Ok(())
    }

    async fn teardown(&mut self) -> Result<bool, FixtureError> {
        Ok(true)
    }

    fn is_running(&mut self) -> bool {
        match self.checks_until_crash.checked_sub(1) {
            Some(remaining) => {
                self.checks_until_crash = remaining;
                true
            }
            None => false,
        }
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

/// Writes an executable `/bin/sh` script and returns its path.
#[cfg(unix)]
pub(crate) fn write_script(dir: &Utf8Path, name: &str, body: &str) -> Utf8PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("wrote script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("made script executable");
    path
}
