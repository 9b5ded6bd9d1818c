//! Fixed-delay retry policy for outbound hub requests.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

/// Retry policy: a bounded number of attempts with a fixed delay between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first one. Never less than 1.
    pub max_attempts: u32,
    /// Delay slept between consecutive attempts.
    pub delay: Duration,
}

/// Why a retried operation gave up.
#[derive(Debug)]
pub struct GaveUp<E> {
    /// How many attempts were made.
    pub attempts: u32,
    /// Error from the last attempt.
    pub error: E,
    /// Whether the last error was classified as transient (attempts ran out)
    /// rather than terminal.
    pub transient: bool,
}

impl RetryPolicy {
    /// Creates a fixed-delay policy.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Run `operation` until it succeeds, fails with an error that
    /// `is_retryable` rejects, or the attempts are used up.
    pub async fn run<F, Fut, T, E, C>(
        &self,
        operation_name: &str,
        mut operation: F,
        is_retryable: C,
    ) -> Result<T, GaveUp<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        C: Fn(&E) -> bool,
    {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    let transient = is_retryable(&error);
                    if !transient || attempts >= self.max_attempts {
                        return Err(GaveUp {
                            attempts,
                            error,
                            transient,
                        });
                    }

                    warn!(
                        "{} attempt {}/{} failed: {}. Retrying in {:?}",
                        operation_name, attempts, self.max_attempts, error, self.delay
                    );
                    sleep(self.delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(3, Duration::from_secs(5))
    }
}
