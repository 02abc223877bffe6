//! Relay metrics
//!
//! Plain atomic counters on the hot path; the metrics endpoint takes a
//! snapshot when scraped.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Counters shared across the relay components
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Message frames admitted to the cache
    pub frames_ingested: AtomicU64,

    /// Frames fanned out (one per subscriber enqueue)
    pub frames_broadcast: AtomicU64,

    /// Upstream frames dropped by the idempotent seq guard
    pub frames_dropped_replay: AtomicU64,

    /// Currently connected subscribers
    pub subscribers_connected: AtomicI64,

    /// Subscribers evicted for backpressure
    pub subscribers_evicted: AtomicU64,

    /// Upstream connection attempts after the first
    pub upstream_reconnects: AtomicU64,

    /// Cache admission failures
    pub storage_errors: AtomicU64,
}

impl RelayMetrics {
    /// Create a zeroed metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_ingested(&self) {
        self.frames_ingested.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_broadcast(&self, fanout: u64) {
        self.frames_broadcast.fetch_add(fanout, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_replay_drop(&self) {
        self.frames_dropped_replay.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn subscriber_connected(&self) {
        self.subscribers_connected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn subscriber_disconnected(&self) {
        self.subscribers_connected.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_eviction(&self) {
        self.subscribers_evicted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reconnect(&self) {
        self.upstream_reconnects.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_storage_error(&self) {
        self.storage_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time snapshot of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_ingested: self.frames_ingested.load(Ordering::Relaxed),
            frames_broadcast: self.frames_broadcast.load(Ordering::Relaxed),
            frames_dropped_replay: self.frames_dropped_replay.load(Ordering::Relaxed),
            subscribers_connected: self.subscribers_connected.load(Ordering::Relaxed),
            subscribers_evicted: self.subscribers_evicted.load(Ordering::Relaxed),
            upstream_reconnects: self.upstream_reconnects.load(Ordering::Relaxed),
            storage_errors: self.storage_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the relay counters
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub frames_ingested: u64,
    pub frames_broadcast: u64,
    pub frames_dropped_replay: u64,
    pub subscribers_connected: i64,
    pub subscribers_evicted: u64,
    pub upstream_reconnects: u64,
    pub storage_errors: u64,
}
