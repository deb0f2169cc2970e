// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{Fixture, FixtureContext};
use crate::{errors::FixtureError, network::JobPorts, runner::JobIndex};
use async_trait::async_trait;
use std::{fmt, sync::Arc};

/// A fixture that starts nothing, for tests that manage their own servers.
#[derive(Debug)]
pub struct NoopFixture {
    ports: Arc<JobPorts>,
}

impl NoopFixture {
    /// Creates a new `NoopFixture`.
    pub fn new(cx: &FixtureContext<'_>) -> Self {
        Self {
            ports: cx.ports.clone(),
        }
    }

    fn not_applicable(&self, role: &'static str) -> FixtureError {
        FixtureError::NotApplicable {
            fixture: self.to_string(),
            role,
        }
    }
}

impl fmt::Display for NoopFixture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "noop fixture ({})", self.ports.job())
    }
}

#[async_trait]
impl Fixture for NoopFixture {
    fn job_index(&self) -> JobIndex {
        self.ports.job()
    }

    fn job_ports(&self) -> &JobPorts {
        &self.ports
    }

    fn port(&self) -> Option<u16> {
        None
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
        true
    }

    fn internal_connection_string(&self) -> Result<String, FixtureError> {
        Err(self.not_applicable("connection string"))
    }

    fn driver_connection_url(&self) -> Result<String, FixtureError> {
        Err(self.not_applicable("connection URL"))
    }
}
