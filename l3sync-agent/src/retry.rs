//! Bounded retry policy for teardown operations.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

/// Default number of attempts before a deletion is abandoned.
pub const DELETION_ATTEMPTS: u32 = 5;

/// Default pause between deletion attempts.
pub const SECONDS_BETWEEN_DELETION_ATTEMPTS: u64 = 3;

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("giving up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
}

/// Attempt an operation up to `max_attempts` times with a fixed backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DELETION_ATTEMPTS,
            backoff: Duration::from_secs(SECONDS_BETWEEN_DELETION_ATTEMPTS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Run `op` until it succeeds or the attempts are used up.
    ///
    /// The backoff is an async sleep, so only the calling task waits.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, RetryError<E>>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            if attempt > 1 {
                tokio::time::sleep(self.backoff).await;
            }
            debug!("{}: attempt {} of {}", what, attempt, max_attempts);

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= max_attempts => {
                    warn!(
                        "Aborting {} after {} unsuccessful attempts: {}",
                        what, attempt, e
                    );
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: e,
                    });
                }
                Err(e) => {
                    debug!("{} failed (attempt {}): {}", what, attempt, e);
                }
            }
            attempt += 1;
        }
    }
}
