// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Distributing a test group's tests across jobs.

use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use std::fmt;

/// The index of a job (lane) within a test group execution.
///
/// Job indexes are dense, `0..N` for `N` jobs. They key everything a job owns exclusively: its
/// port range and its data directories.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct JobIndex(usize);

impl JobIndex {
    /// Creates a new `JobIndex`.
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the index as a `usize`.
    pub fn get(self) -> usize {
        self.0
    }

    /// Returns the name of this job's directory under a data directory prefix: `job<N>`.
    pub fn dir_name(self) -> String {
        format!("job{}", self.0)
    }
}

impl fmt::Display for JobIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job {}", self.0)
    }
}

/// Splits `tests` round-robin into `num_jobs` lanes.
///
/// Test `i` goes to lane `i % num_jobs`, so the relative order of tests within each lane matches
/// their order in `tests`. Lanes may be empty if there are fewer tests than jobs.
///
/// # Panics
///
/// Panics if `num_jobs` is zero.
pub fn partition<T>(tests: impl IntoIterator<Item = T>, num_jobs: usize) -> Vec<Vec<T>> {
    assert!(num_jobs > 0, "num_jobs must be at least 1");
    let mut lanes: Vec<Vec<T>> = (0..num_jobs).map(|_| Vec::new()).collect();
    for (index, test) in tests.into_iter().enumerate() {
        lanes[index % num_jobs].push(test);
    }
    lanes
}

/// Shuffles `tests` in place. The same seed and input always produce the same order.
pub fn shuffle_tests<T>(tests: &mut [T], seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    tests.shuffle(&mut rng);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use test_strategy::proptest;

    #[test]
    fn round_robin() {
        let lanes = partition(["a", "b", "c", "d", "e"], 2);
        assert_eq!(lanes, vec![vec!["a", "c", "e"], vec!["b", "d"]]);

        let lanes = partition(["a"], 3);
        assert_eq!(lanes, vec![vec!["a"], vec![], vec![]]);
    }

    #[test]
    fn job_index_names() {
        let job = JobIndex::new(3);
        assert_eq!(job.get(), 3);
        assert_eq!(job.dir_name(), "job3");
        assert_eq!(job.to_string(), "job 3");
    }

    #[proptest]
    fn every_test_in_exactly_one_lane(
        #[strategy(prop::collection::vec(any::<u32>(), 0..64))] tests: Vec<u32>,
        #[strategy(1usize..16)] num_jobs: usize,
    ) {
        // Tag each test with its position so duplicates in the input stay distinguishable.
        let tagged: Vec<(usize, u32)> = tests.iter().copied().enumerate().collect();
        let lanes = partition(tagged.clone(), num_jobs);
        prop_assert_eq!(lanes.len(), num_jobs);

        // Order within a lane follows input order.
        for lane in &lanes {
            prop_assert!(lane.windows(2).all(|pair| pair[0].0 < pair[1].0));
        }

        let mut union: Vec<_> = lanes.into_iter().flatten().collect();
        union.sort();
        prop_assert_eq!(union, tagged);
    }

    #[proptest]
    fn shuffle_is_deterministic(
        #[strategy(prop::collection::vec(any::<u32>(), 0..64))] tests: Vec<u32>,
        seed: u64,
        #[strategy(1usize..8)] num_jobs: usize,
    ) {
        let mut first = tests.clone();
        shuffle_tests(&mut first, seed);
        let mut second = tests.clone();
        shuffle_tests(&mut second, seed);
        prop_assert_eq!(partition(first.clone(), num_jobs), partition(second, num_jobs));

        // A shuffle is a permutation.
        let mut sorted = first;
        sorted.sort_unstable();
        let mut expected = tests;
        expected.sort_unstable();
        prop_assert_eq!(sorted, expected);
    }
}
