//! Per-subscriber delivery settings

use std::time::Duration;

use serde::Deserialize;

/// Backpressure and delivery limits applied to every subscriber
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SubscriberConfig {
    /// Outbound queue capacity in frames
    pub queue_frames: usize,

    /// Outbound queue budget in bytes; whichever limit trips first
    /// evicts the subscriber
    pub queue_bytes: u64,

    /// Seconds allowed for one frame write before the subscriber is
    /// considered dead
    pub write_deadline_secs: u64,

    /// Seconds a subscriber gets to flush during shutdown
    pub shutdown_flush_secs: u64,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            queue_frames: 1024,
            queue_bytes: 8 * 1024 * 1024,
            write_deadline_secs: 30,
            shutdown_flush_secs: 5,
        }
    }
}

impl SubscriberConfig {
    /// Per-frame write deadline as a `Duration`
    pub fn write_deadline(&self) -> Duration {
        Duration::from_secs(self.write_deadline_secs)
    }

    /// Shutdown flush budget as a `Duration`
    pub fn shutdown_flush(&self) -> Duration {
        Duration::from_secs(self.shutdown_flush_secs)
    }
}
