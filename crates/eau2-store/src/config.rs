use std::time::Duration;

use eau2_protocol::DEFAULT_MAX_DELAY_MS;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// How long `wait_and_get` waits for a remote key.
    pub wait_timeout_ms: u64,
    /// Sent with every WaitAndGet: how long the owner holds the request open.
    pub max_delay_ms: u32,
    /// Listener sleep between polls of an empty inbound queue.
    pub poll_interval_ms: u64,
}

impl StoreConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: 10_000,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            poll_interval_ms: 1,
        }
    }
}
