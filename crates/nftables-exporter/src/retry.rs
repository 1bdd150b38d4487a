//! Explicit retry policy for transient failures.
//!
//! Only geo database provisioning retries; the polling cycle never does.

use std::future::Future;
use tracing::warn;

use crate::error::{ExporterError, Result};

/// Number of retried attempts after the first one fails.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Runs an operation up to `max_retries + 1` times.
///
/// Attempts that fail with an error accepted by the caller's predicate are
/// retried; any other error, or the error of the final attempt, is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Runs `attempt` until it succeeds, fails with a non-retryable error or
    /// the retries are used up.
    pub async fn run<T, F, Fut, P>(&self, operation: &str, is_retryable: P, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&ExporterError) -> bool,
    {
        for retry in 0..self.max_retries {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(e) if is_retryable(&e) => {
                    warn!(
                        operation,
                        retry = retry + 1,
                        max_retries = self.max_retries,
                        error = %e,
                        "Retrying failed operation"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        attempt().await
    }
}
