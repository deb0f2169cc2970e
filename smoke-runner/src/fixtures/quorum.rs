// Copyright (c) The smoke Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::{AdminError, FixtureError};
use std::{future::Future, time::Duration};
use tokio::time::Instant;
use tracing::debug;

/// Retries an operation against a replicated deployment until it succeeds or a deadline passes.
///
/// Right after a replica set is initiated, or after an election, the primary may briefly refuse
/// connections. Operations issued through `QuorumWait` retry connectivity failures until the
/// window closes; any other error is returned immediately.
#[derive(Clone, Debug)]
pub struct QuorumWait {
    window: Duration,
    retry_delay: Duration,
}

impl QuorumWait {
    /// The default time window for replicated operations.
    pub const DEFAULT_WINDOW: Duration = Duration::from_secs(5 * 60);

    /// The default delay between attempts.
    pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

    /// Creates a new `QuorumWait`.
    pub fn new(window: Duration, retry_delay: Duration) -> Self {
        Self {
            window,
            retry_delay,
        }
    }

    /// Returns the window used by [`retry_until_wtimeout`](Self::retry_until_wtimeout).
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Runs `op` until it succeeds, with a deadline one window from now.
    pub async fn retry_until_wtimeout<T, F, Fut>(&self, port: u16, op: F) -> Result<T, FixtureError>
    where
        F: FnMut(Duration) -> Fut,
        Fut: Future<Output = Result<T, AdminError>>,
    {
        self.retry_until(Instant::now() + self.window, port, op)
            .await
    }

    /// Runs `op` until it succeeds or `deadline` passes.
    ///
    /// `op` is passed the time remaining until the deadline, and is always called at least once.
    /// Connectivity failures ([`AdminError::Connection`]) are retried; once the deadline has
    /// passed, the last one is turned into [`FixtureError::ServerFailure`] naming `port`. Other
    /// errors are returned unchanged.
    pub async fn retry_until<T, F, Fut>(
        &self,
        deadline: Instant,
        port: u16,
        mut op: F,
    ) -> Result<T, FixtureError>
    where
        F: FnMut(Duration) -> Fut,
        Fut: Future<Output = Result<T, AdminError>>,
    {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match op(remaining).await {
                Ok(value) => return Ok(value),
                Err(error @ AdminError::Connection { .. }) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(FixtureError::server_failure(format!(
                            "failed to connect to the primary on port {port}"
                        )));
                    }
                    debug!(
                        target: "smoke::fixture",
                        port,
                        "retrying replicated operation: {error}",
                    );
                    tokio::time::sleep(self.retry_delay.min(deadline - now)).await;
                }
                Err(error) => return Err(error.into()),
            }
        }
    }
}

impl Default for QuorumWait {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WINDOW, Self::DEFAULT_RETRY_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn connection_error(port: u16) -> AdminError {
        AdminError::Connection {
            port,
            reason: "connection refused".to_owned(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_failures() {
        let attempts = AtomicUsize::new(0);
        let quorum = QuorumWait::new(Duration::from_secs(60), Duration::from_millis(100));
        let n = 4;

        let value = quorum
            .retry_until_wtimeout(20000, |_remaining| {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < n {
                        Err(connection_error(20000))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .expect("eventually succeeds");

        assert_eq!(value, n);
        assert_eq!(attempts.load(Ordering::SeqCst), n + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn past_deadline_fails_after_one_attempt() {
        let attempts = AtomicUsize::new(0);
        let quorum = QuorumWait::default();
        let deadline = Instant::now() - Duration::from_secs(1);

        let error = quorum
            .retry_until(deadline, 20010, |remaining| {
                attempts.fetch_add(1, Ordering::SeqCst);
                assert_eq!(remaining, Duration::ZERO);
                async { Err::<(), _>(connection_error(20010)) }
            })
            .await
            .expect_err("deadline already passed");

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(
            matches!(&error, FixtureError::ServerFailure { message } if message.contains("20010")),
            "unexpected error: {error}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn non_connection_errors_propagate() {
        let attempts = AtomicUsize::new(0);
        let quorum = QuorumWait::default();

        let error = quorum
            .retry_until_wtimeout(20000, |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(AdminError::WriteTimeout {
                        port: 20000,
                        nodes: 2,
                    })
                }
            })
            .await
            .expect_err("write timeout isn't retried");

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(matches!(
            error,
            FixtureError::Admin(AdminError::WriteTimeout { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_when_window_closes() {
        let attempts = AtomicUsize::new(0);
        let quorum = QuorumWait::new(Duration::from_secs(1), Duration::from_millis(300));

        let error = quorum
            .retry_until_wtimeout(20000, |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(connection_error(20000)) }
            })
            .await
            .expect_err("never connects");

        // Attempts at 0, 300, 600, 900 and 1000 ms.
        assert_eq!(attempts.load(Ordering::SeqCst), 5);
        assert!(matches!(error, FixtureError::ServerFailure { .. }));
    }
}
