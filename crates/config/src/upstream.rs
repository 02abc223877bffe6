//! Upstream firehose connection settings

use std::time::Duration;

use serde::Deserialize;

/// Settings for the single upstream firehose connection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Hostname (and optional port) of the firehose producer
    pub host: String,

    /// Use ws:// instead of wss:// when connecting
    pub insecure: bool,

    /// Seconds without any inbound frame before the connection is
    /// considered dead
    pub idle_timeout_secs: u64,

    /// Seconds of continuous disconnection before live subscribers are
    /// notified with an upstream-disconnected notice
    pub grace_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            insecure: false,
            idle_timeout_secs: 60,
            grace_secs: 30,
        }
    }
}

impl UpstreamConfig {
    /// Idle read deadline as a `Duration`
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Disconnect-notice grace period as a `Duration`
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}
