//! Dispatcher - cache admission and subscriber fan-out
//!
//! The dispatcher sits between the upstream client and everything else.
//! Message frames are admitted to the cache first; only an acknowledged
//! frame becomes visible to subscribers. Info and Error frames are
//! broadcast without touching the cache.
//!
//! # Backpressure
//!
//! Every subscriber gets a bounded queue (frame count plus a byte
//! budget). Broadcast enqueues are non-blocking: a full queue evicts that
//! subscriber on the spot, so no reader can ever stall the ingest path.
//! Registry mutations take a short write lock; broadcasts enumerate a
//! snapshot so no lock is held across enqueues.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::SystemTime;

use bytes::Bytes;
use manifold_cache::SequenceCache;
use manifold_protocol::{ErrorCode, Frame, InfoCode};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{RelayError, Result};
use crate::metrics::RelayMetrics;

/// Consecutive admission failures before Message ingest halts
const MAX_STORAGE_FAILURES: u32 = 5;

/// Dispatcher tuning knobs
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Per-subscriber queue capacity in frames
    pub queue_frames: usize,

    /// Per-subscriber queue budget in body bytes
    pub queue_bytes: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_frames: 1024,
            queue_bytes: 8 * 1024 * 1024,
        }
    }
}

/// Enqueue capability for one registered subscriber
pub(crate) struct SubscriberHandle {
    id: u64,
    tx: mpsc::Sender<Frame>,
    queued_bytes: AtomicU64,
    byte_cap: u64,
    cancel: CancellationToken,
    kicked: AtomicBool,
}

enum PushOutcome {
    Queued,
    Overflow,
    Closed,
}

impl SubscriberHandle {
    fn try_push(&self, frame: Frame) -> PushOutcome {
        let len = frame.body().len() as u64;

        if self.queued_bytes.load(Ordering::Relaxed) + len > self.byte_cap {
            return PushOutcome::Overflow;
        }

        match self.tx.try_send(frame) {
            Ok(()) => {
                self.queued_bytes.fetch_add(len, Ordering::Relaxed);
                PushOutcome::Queued
            }
            Err(mpsc::error::TrySendError::Full(_)) => PushOutcome::Overflow,
            Err(mpsc::error::TrySendError::Closed(_)) => PushOutcome::Closed,
        }
    }
}

/// A live registration: the receiving half plus its handle bookkeeping
///
/// Dropping the subscription (or its receiver) lets the dispatcher reap
/// the registration on the next broadcast.
pub struct Subscription {
    handle: Arc<SubscriberHandle>,
    rx: mpsc::Receiver<Frame>,
}

impl Subscription {
    /// Subscriber id, for logging
    pub fn id(&self) -> u64 {
        self.handle.id
    }

    /// Receive the next staged frame, maintaining byte accounting
    pub async fn recv(&mut self) -> Option<Frame> {
        let frame = self.rx.recv().await?;
        self.handle
            .queued_bytes
            .fetch_sub(frame.body().len() as u64, Ordering::Relaxed);
        Some(frame)
    }

    /// Token cancelled when the dispatcher evicts this subscriber
    pub fn eviction_token(&self) -> CancellationToken {
        self.handle.cancel.clone()
    }

    /// True when the eviction was for backpressure
    pub fn was_kicked(&self) -> bool {
        self.handle.kicked.load(Ordering::Relaxed)
    }
}

/// Routes admitted frames to the cache and all live subscribers
pub struct Dispatcher {
    cache: Arc<SequenceCache>,
    registry: RwLock<HashMap<u64, Arc<SubscriberHandle>>>,
    next_id: AtomicU64,
    storage_failures: AtomicU32,
    halted: AtomicBool,
    config: DispatcherConfig,
    metrics: Arc<RelayMetrics>,
}

impl Dispatcher {
    /// Create a dispatcher over the given cache
    pub fn new(
        cache: Arc<SequenceCache>,
        config: DispatcherConfig,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            cache,
            registry: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            storage_failures: AtomicU32::new(0),
            halted: AtomicBool::new(false),
            config,
            metrics,
        }
    }

    /// The cache this dispatcher admits into
    pub fn cache(&self) -> &Arc<SequenceCache> {
        &self.cache
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.registry.read().len()
    }

    /// True once Message ingest has been halted by storage failures
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Relaxed)
    }

    /// Register a new live subscriber
    ///
    /// Frames admitted after this call are staged into the returned
    /// subscription's queue, which is exactly what the replay/live merge
    /// relies on: register first, then scan the cache.
    pub fn register(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.config.queue_frames);

        let handle = Arc::new(SubscriberHandle {
            id,
            tx,
            queued_bytes: AtomicU64::new(0),
            byte_cap: self.config.queue_bytes,
            cancel: CancellationToken::new(),
            kicked: AtomicBool::new(false),
        });

        self.registry.write().insert(id, Arc::clone(&handle));
        debug!(subscriber_id = id, "subscriber registered");

        Subscription { handle, rx }
    }

    /// Remove a subscriber from the registry
    pub fn unregister(&self, id: u64) {
        if self.registry.write().remove(&id).is_some() {
            debug!(subscriber_id = id, "subscriber unregistered");
        }
    }

    /// Admit a Message frame: cache first, then fan out
    ///
    /// Returns an error without broadcasting if the cache rejects the
    /// frame. Repeated storage failures halt Message ingest entirely;
    /// Info/Error broadcast stays available.
    ///
    /// Admissions must come from a single task (the upstream client) so
    /// that broadcast order matches cache order.
    pub fn admit(&self, seq: u64, body: Bytes, received_at: SystemTime) -> Result<()> {
        if self.is_halted() {
            return Err(RelayError::IngestHalted);
        }

        if let Err(e) = self.cache.append(seq, &body, received_at) {
            if e.is_ordering() {
                // The upstream guard should have dropped this already.
                warn!(seq, error = %e, "cache rejected out-of-order frame");
                return Err(e.into());
            }

            self.metrics.record_storage_error();
            let failures = self.storage_failures.fetch_add(1, Ordering::Relaxed) + 1;
            error!(seq, failures, error = %e, "cache admission failed");

            if failures >= MAX_STORAGE_FAILURES {
                self.halted.store(true, Ordering::Relaxed);
                error!("message ingest halted; info/error broadcast continues");
            }
            return Err(e.into());
        }

        self.storage_failures.store(0, Ordering::Relaxed);
        self.metrics.record_ingested();

        self.broadcast(Frame::Message { seq, body });
        Ok(())
    }

    /// Broadcast an advisory notice to all live subscribers
    pub fn broadcast_info(&self, code: InfoCode, note: &str) {
        info!(?code, note, "broadcasting info frame");
        self.broadcast(Frame::info(code, note));
    }

    /// Pass a non-Message frame through to all live subscribers
    pub fn broadcast_passthrough(&self, frame: Frame) {
        debug_assert!(frame.seq().is_none());
        self.broadcast(frame);
    }

    fn broadcast(&self, frame: Frame) {
        // Snapshot under a short read lock; enqueues happen lock-free.
        let handles: Vec<Arc<SubscriberHandle>> =
            self.registry.read().values().cloned().collect();

        if handles.is_empty() {
            return;
        }

        let mut fanout = 0u64;
        for handle in handles {
            match handle.try_push(frame.clone()) {
                PushOutcome::Queued => fanout += 1,
                PushOutcome::Overflow => self.evict(&handle),
                PushOutcome::Closed => self.unregister(handle.id),
            }
        }

        self.metrics.record_broadcast(fanout);
    }

    /// Evict a subscriber that cannot keep up
    ///
    /// The subscriber's own task notices the cancellation and sends the
    /// best-effort ConsumerTooSlow notice; the dispatcher only drops the
    /// enqueue capability.
    fn evict(&self, handle: &SubscriberHandle) {
        if handle.kicked.swap(true, Ordering::Relaxed) {
            return;
        }
        warn!(
            subscriber_id = handle.id,
            code = ?ErrorCode::ConsumerTooSlow,
            "evicting slow subscriber"
        );
        handle.cancel.cancel();
        self.unregister(handle.id);
        self.metrics.record_eviction();
    }
}

#[cfg(test)]
#[path = "dispatcher_test.rs"]
mod tests;
