//! Retry policy for bridge requests

use std::future::Future;
use std::time::Duration;

use crate::config::BridgeConfig;
use crate::Result;

/// Fixed-delay retry for connection and timeout failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt
    pub retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, delay: Duration) -> Self {
        Self { retries, delay }
    }

    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(config.retries, config.retry_delay())
    }

    /// Run `attempt` until it succeeds, fails with a non-retryable error, or
    /// the retry budget is spent. Every call of `attempt` is a fresh request.
    pub async fn run<T, F, Fut>(&self, method: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retried = 0;
        loop {
            match attempt().await {
                Err(e) if e.is_retryable() && retried < self.retries => {
                    retried += 1;
                    tracing::debug!(
                        method = %method,
                        attempt = retried,
                        error = %e,
                        "Retrying request"
                    );
                    tokio::time::sleep(self.delay).await;
                }
                other => return other,
            }
        }
    }
}
