// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Port allocation.
//!
//! Every job owns a fixed, contiguous range of [`PORTS_PER_JOB`] ports starting at
//! `base_port + job * PORTS_PER_JOB`. The first [`PORTS_PER_FIXTURE`] ports of a range are handed
//! out to the job's fixture processes; the rest are made available to tests that start their own
//! servers. Since ranges are a pure function of the job index, concurrent jobs never collide and
//! no coordination is needed.

use crate::{errors::PortAllocationError, runner::JobIndex};
use std::{
    fmt,
    num::NonZeroUsize,
    ops::Range,
    sync::atomic::{AtomicU16, Ordering},
};

/// The number of ports reserved for each job.
pub const PORTS_PER_JOB: u16 = 250;

/// The number of ports at the start of each job's range reserved for fixture processes.
pub const PORTS_PER_FIXTURE: u16 = 10;

/// The default first port.
pub const DEFAULT_BASE_PORT: u16 = 20000;

/// A half-open range of ports, `[start, end)`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct PortRange {
    start: u16,
    end: u16,
}

impl PortRange {
    /// Returns the first port in the range.
    pub fn start(&self) -> u16 {
        self.start
    }

    /// Returns one past the last port in the range.
    pub fn end(&self) -> u16 {
        self.end
    }

    /// Returns true if `port` is in the range.
    pub fn contains(&self, port: u16) -> bool {
        self.as_range().contains(&port)
    }

    /// Returns true if the two ranges share a port.
    pub fn overlaps(&self, other: &PortRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns the range as a `std::ops::Range`.
    pub fn as_range(&self) -> Range<u16> {
        self.start..self.end
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Maps job indexes to port ranges.
#[derive(Clone, Copy, Debug)]
pub struct PortAllocator {
    base_port: u16,
    job_count: usize,
}

impl PortAllocator {
    /// Creates a new allocator, checking that every job's range fits below port 65536.
    pub fn new(base_port: u16, job_count: NonZeroUsize) -> Result<Self, PortAllocationError> {
        let job_count = job_count.get();
        let needed = job_count as u64 * u64::from(PORTS_PER_JOB);
        if u64::from(base_port) + needed > u64::from(u16::MAX) + 1 {
            return Err(PortAllocationError::PortSpaceExhausted {
                base_port,
                job_count,
                ports_per_job: PORTS_PER_JOB,
            });
        }
        Ok(Self {
            base_port,
            job_count,
        })
    }

    /// Returns the number of jobs this allocator was created for.
    pub fn job_count(&self) -> usize {
        self.job_count
    }

    /// Returns the port range of a job.
    pub fn range(&self, job: JobIndex) -> Result<PortRange, PortAllocationError> {
        if job.get() >= self.job_count {
            return Err(PortAllocationError::JobOutOfRange {
                job,
                job_count: self.job_count,
            });
        }
        // `new` guarantees the start fits. A range ending exactly at the top of the port space
        // is clamped, giving up port 65535.
        let start = u32::from(self.base_port) + job.get() as u32 * u32::from(PORTS_PER_JOB);
        let end = start + u32::from(PORTS_PER_JOB);
        Ok(PortRange {
            start: start as u16,
            end: end.min(u32::from(u16::MAX)) as u16,
        })
    }

    /// Returns the port bookkeeping for one job.
    pub fn job_ports(&self, job: JobIndex) -> Result<JobPorts, PortAllocationError> {
        Ok(JobPorts {
            job,
            range: self.range(job)?,
            fixture_ports_used: AtomicU16::new(0),
        })
    }
}

/// The ports owned by one job.
#[derive(Debug)]
pub struct JobPorts {
    job: JobIndex,
    range: PortRange,
    fixture_ports_used: AtomicU16,
}

impl JobPorts {
    /// Returns the job these ports belong to.
    pub fn job(&self) -> JobIndex {
        self.job
    }

    /// Returns the job's whole range.
    pub fn range(&self) -> PortRange {
        self.range
    }

    /// Hands out the next unused fixture port.
    pub fn next_fixture_port(&self) -> Result<u16, PortAllocationError> {
        let offset = self
            .fixture_ports_used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < PORTS_PER_FIXTURE).then_some(used + 1)
            })
            .map_err(|_| PortAllocationError::FixturePortsExhausted {
                job: self.job,
                available: PORTS_PER_FIXTURE,
            })?;
        Ok(self.range.start + offset)
    }

    /// Returns the first port tests may use.
    pub fn min_test_port(&self) -> u16 {
        self.range.start + PORTS_PER_FIXTURE
    }

    /// Returns the last port tests may use (inclusive).
    pub fn max_test_port(&self) -> u16 {
        self.range.end - 1
    }
}
