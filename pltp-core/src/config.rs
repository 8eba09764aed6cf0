//! Session timing and retry budgets.

use std::time::Duration;

use serde::Deserialize;

/// Tunables for one session. Deserializable so hosts can embed it in their
/// own config file; durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// How long a sender waits for the one-byte reply to a frame (default 30 s).
    pub ack_window_ms: u64,
    /// Sleep between transport polls while waiting for data (default 10 ms).
    pub poll_interval_ms: u64,
    /// Sleep between connectivity checks during `begin` (default 200 ms).
    pub connect_poll_ms: u64,
    /// Content failures a receiver tolerates per message (default 3).
    pub receive_retries: u32,
    /// Attempts for `send_file`'s FileInfo frame (default 5).
    pub default_attempts: u32,
    /// Attempts for a clock frame (default 3).
    pub clock_attempts: u32,
    /// Attempts for each FileContent frame (default 3).
    pub content_attempts: u32,
}

impl SessionConfig {
    pub fn ack_window(&self) -> Duration {
        Duration::from_millis(self.ack_window_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_poll(&self) -> Duration {
        Duration::from_millis(self.connect_poll_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ack_window_ms: 30_000,
            poll_interval_ms: 10,
            connect_poll_ms: 200,
            receive_retries: 3,
            default_attempts: 5,
            clock_attempts: 3,
            content_attempts: 3,
        }
    }
}
