//! Subscriber - per-connection replay and live-tail state machine
//!
//! A subscriber attaches with an optional cursor, replays retained frames
//! from the cache, then follows the live feed. The merge is a handoff,
//! not a loop: the live registration happens *before* the cache scan, so
//! frames admitted during replay stage into the subscriber's bounded
//! queue; staged frames the replay already covered are filtered out by
//! `last_sent_seq`. Doing it in the other order opens a gap window.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use manifold_protocol::{ErrorCode, Frame, InfoCode};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::dispatcher::{Dispatcher, Subscription};
use crate::metrics::RelayMetrics;
use crate::sink::FrameSink;

/// Delivery limits applied to each subscriber
#[derive(Debug, Clone)]
pub struct SubscriberLimits {
    /// Deadline for writing one frame to the transport
    pub write_deadline: Duration,
}

impl Default for SubscriberLimits {
    fn default() -> Self {
        Self {
            write_deadline: Duration::from_secs(30),
        }
    }
}

/// Shared state a subscriber session needs
pub struct SubscriberContext {
    pub dispatcher: Arc<Dispatcher>,
    /// Authoritative latest known upstream seq, written by the upstream
    /// client, read here to validate cursors
    pub latest_seq: Arc<AtomicU64>,
    pub limits: SubscriberLimits,
    pub metrics: Arc<RelayMetrics>,
}

/// Why a subscriber session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Requested cursor is older than the retention window
    OutdatedCursor,
    /// Requested cursor is ahead of the newest known seq
    FutureCursor,
    /// Outbound queue overflowed or a frame write timed out
    ConsumerTooSlow,
    /// The client went away
    ClientClosed,
    /// Server shutdown
    Shutdown,
    /// Transport write failed
    Transport,
    /// Cache read failed mid-replay
    Cache,
}

/// Drive one subscriber connection to completion
///
/// Owns the full lifecycle: cursor validation, replay, live tailing, and
/// terminal notices. Always closes the sink before returning.
pub async fn run_subscriber<S: FrameSink>(
    ctx: &SubscriberContext,
    requested_cursor: Option<u64>,
    mut sink: S,
    shutdown: CancellationToken,
    client_gone: CancellationToken,
) -> DisconnectReason {
    ctx.metrics.subscriber_connected();
    let reason = drive(ctx, requested_cursor, &mut sink, &shutdown, &client_gone).await;
    sink.close().await;
    ctx.metrics.subscriber_disconnected();
    reason
}

async fn drive<S: FrameSink>(
    ctx: &SubscriberContext,
    requested_cursor: Option<u64>,
    sink: &mut S,
    shutdown: &CancellationToken,
    client_gone: &CancellationToken,
) -> DisconnectReason {
    let cache = ctx.dispatcher.cache();

    let cursor = match requested_cursor {
        Some(cursor) => {
            let latest = ctx.latest_seq.load(Ordering::Acquire);
            if cursor > latest.saturating_add(1) {
                debug!(cursor, latest, "rejecting future cursor");
                let notice = Frame::error(ErrorCode::FutureCursor, "cursor is ahead of the stream");
                let _ = timeout(ctx.limits.write_deadline, sink.send(&notice)).await;
                return DisconnectReason::FutureCursor;
            }
            let in_past = match cache.bounds() {
                Some((lo, _)) => cursor < lo,
                // Empty window: any cursor at or before the known tail
                // points at evicted (or never-cached) history.
                None => cursor <= latest,
            };
            if in_past {
                debug!(cursor, "rejecting outdated cursor");
                let notice =
                    Frame::info(InfoCode::OutdatedCursor, "cursor is outside the retention window");
                let _ = timeout(ctx.limits.write_deadline, sink.send(&notice)).await;
                return DisconnectReason::OutdatedCursor;
            }
            Some(cursor)
        }
        None => None,
    };

    // Live registration first: frames admitted from here on are staged in
    // the subscription queue while the replay drains the cache.
    let mut sub = ctx.dispatcher.register();
    let evicted = sub.eviction_token();
    let reason = stream_frames(ctx, &mut sub, &evicted, cursor, sink, shutdown, client_gone).await;
    ctx.dispatcher.unregister(sub.id());
    reason
}

/// Outcome of one frame write raced against the cancellation sources
enum Delivery {
    Sent,
    Evicted,
    Shutdown,
    ClientGone,
    Failed,
    TimedOut,
}

/// Write one frame, never going deaf to eviction or shutdown while the
/// transport is slow
async fn deliver<S: FrameSink>(
    sink: &mut S,
    frame: &Frame,
    deadline: Duration,
    evicted: &CancellationToken,
    shutdown: &CancellationToken,
    client_gone: &CancellationToken,
) -> Delivery {
    tokio::select! {
        sent = timeout(deadline, sink.send(frame)) => match sent {
            Ok(Ok(())) => Delivery::Sent,
            Ok(Err(_)) => Delivery::Failed,
            Err(_) => Delivery::TimedOut,
        },
        _ = evicted.cancelled() => Delivery::Evicted,
        _ = shutdown.cancelled() => Delivery::Shutdown,
        _ = client_gone.cancelled() => Delivery::ClientGone,
    }
}

async fn stream_frames<S: FrameSink>(
    ctx: &SubscriberContext,
    sub: &mut Subscription,
    evicted: &CancellationToken,
    cursor: Option<u64>,
    sink: &mut S,
    shutdown: &CancellationToken,
    client_gone: &CancellationToken,
) -> DisconnectReason {
    let deadline = ctx.limits.write_deadline;
    let mut last_sent_seq: Option<u64> = None;

    // Replay phase: drain the cache snapshot from the cursor.
    if let Some(cursor) = cursor {
        let mut scan = ctx.dispatcher.cache().scan_from(cursor);
        loop {
            let entry = match scan.next_entry() {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(subscriber_id = sub.id(), error = %e, "cache scan failed");
                    return DisconnectReason::Cache;
                }
            };
            let (seq, body) = entry;
            let frame = Frame::Message { seq, body };

            match deliver(sink, &frame, deadline, evicted, shutdown, client_gone).await {
                Delivery::Sent => last_sent_seq = Some(seq),
                Delivery::Evicted => return evicted_reason(sub, sink, deadline).await,
                Delivery::Shutdown => return DisconnectReason::Shutdown,
                Delivery::ClientGone => return DisconnectReason::ClientClosed,
                Delivery::Failed => return DisconnectReason::Transport,
                Delivery::TimedOut => return DisconnectReason::ConsumerTooSlow,
            }
        }
        debug!(
            subscriber_id = sub.id(),
            last_sent = ?last_sent_seq,
            "replay complete, going live"
        );
    }

    // Live phase: staged frames the replay already delivered fall out of
    // the queue first and are dropped by the seq filter.
    loop {
        let frame = tokio::select! {
            frame = sub.recv() => {
                let Some(frame) = frame else {
                    return DisconnectReason::Shutdown;
                };
                frame
            }
            _ = evicted.cancelled() => return evicted_reason(sub, sink, deadline).await,
            _ = shutdown.cancelled() => return DisconnectReason::Shutdown,
            _ = client_gone.cancelled() => return DisconnectReason::ClientClosed,
        };

        if let Some(seq) = frame.seq() {
            if last_sent_seq.is_some_and(|last| seq <= last) {
                continue;
            }
        }

        match deliver(sink, &frame, deadline, evicted, shutdown, client_gone).await {
            Delivery::Sent => {
                if let Some(seq) = frame.seq() {
                    last_sent_seq = Some(seq);
                }
            }
            Delivery::Evicted => return evicted_reason(sub, sink, deadline).await,
            Delivery::Shutdown => return DisconnectReason::Shutdown,
            Delivery::ClientGone => return DisconnectReason::ClientClosed,
            Delivery::Failed => return DisconnectReason::Transport,
            Delivery::TimedOut => return DisconnectReason::ConsumerTooSlow,
        }
    }
}

/// Map a dispatcher eviction to its reason, sending the best-effort
/// slow-consumer notice when that is what happened
async fn evicted_reason<S: FrameSink>(
    sub: &Subscription,
    sink: &mut S,
    deadline: Duration,
) -> DisconnectReason {
    if sub.was_kicked() {
        let notice = Frame::error(ErrorCode::ConsumerTooSlow, "outbound queue overflow");
        let _ = timeout(deadline.min(Duration::from_secs(1)), sink.send(&notice)).await;
        DisconnectReason::ConsumerTooSlow
    } else {
        DisconnectReason::Shutdown
    }
}

#[cfg(test)]
#[path = "subscriber_test.rs"]
mod tests;
