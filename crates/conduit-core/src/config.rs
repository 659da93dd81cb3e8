//! Bridge configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
    /// Per-attempt request deadline in milliseconds
    #[serde(rename = "timeout")]
    pub timeout_ms: u64,
    /// Retries after the initial attempt for retryable failures
    pub retries: u32,
    /// Fixed wait before each retry, in milliseconds
    #[serde(rename = "retryDelay")]
    pub retry_delay_ms: u64,
    /// Offline queue capacity
    pub queue_size: usize,
    /// Background batch flush threshold
    pub batch_size: usize,
    /// Background batch idle delay in milliseconds
    #[serde(rename = "batchDelay")]
    pub batch_delay_ms: u64,
    pub enable_offline_queue: bool,
    pub enable_binary_transfer: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            retries: 3,
            retry_delay_ms: 1_000,
            queue_size: 1_000,
            batch_size: 10,
            batch_delay_ms: 50,
            enable_offline_queue: true,
            enable_binary_transfer: true,
        }
    }
}

/// Saturates instead of wrapping for durations beyond `u64::MAX` ms.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl BridgeConfig {
    /// Parse a JSON document; missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = millis(timeout);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = millis(delay);
        self
    }

    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay_ms = millis(delay);
        self
    }

    pub fn with_offline_queue(mut self, enabled: bool) -> Self {
        self.enable_offline_queue = enabled;
        self
    }

    pub fn with_binary_transfer(mut self, enabled: bool) -> Self {
        self.enable_binary_transfer = enabled;
        self
    }
}
