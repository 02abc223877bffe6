//! Tests for the subscriber state machine

use std::io;
use std::sync::atomic::AtomicBool;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use manifold_cache::{CacheConfig, SequenceCache};
use parking_lot::Mutex;

use super::*;
use crate::dispatcher::DispatcherConfig;
use crate::metrics::RelayMetrics;

/// Sink that records every frame
#[derive(Clone, Default)]
struct TestSink {
    sent: Arc<Mutex<Vec<Frame>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl FrameSink for TestSink {
    async fn send(&mut self, frame: &Frame) -> io::Result<()> {
        self.sent.lock().push(frame.clone());
        Ok(())
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

impl TestSink {
    fn seqs(&self) -> Vec<u64> {
        self.sent.lock().iter().filter_map(Frame::seq).collect()
    }

    fn len(&self) -> usize {
        self.sent.lock().len()
    }
}

/// Sink whose writes never complete
struct StuckSink;

#[async_trait]
impl FrameSink for StuckSink {
    async fn send(&mut self, _frame: &Frame) -> io::Result<()> {
        std::future::pending().await
    }

    async fn close(&mut self) {}
}

fn context(config: DispatcherConfig) -> Arc<SubscriberContext> {
    let cache = Arc::new(SequenceCache::memory(CacheConfig::default()));
    let metrics = Arc::new(RelayMetrics::new());
    let dispatcher = Arc::new(Dispatcher::new(cache, config, Arc::clone(&metrics)));
    Arc::new(SubscriberContext {
        dispatcher,
        latest_seq: Arc::new(AtomicU64::new(0)),
        limits: SubscriberLimits::default(),
        metrics,
    })
}

fn admit_range(ctx: &SubscriberContext, seqs: std::ops::RangeInclusive<u64>) {
    for seq in seqs {
        ctx.dispatcher
            .admit(seq, Bytes::from(format!("frame-{seq}")), SystemTime::now())
            .unwrap();
        ctx.latest_seq.store(seq, Ordering::Release);
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn spawn_subscriber(
    ctx: &Arc<SubscriberContext>,
    cursor: Option<u64>,
    sink: TestSink,
) -> (
    tokio::task::JoinHandle<DisconnectReason>,
    CancellationToken,
    CancellationToken,
) {
    let shutdown = CancellationToken::new();
    let client_gone = CancellationToken::new();
    let ctx = Arc::clone(ctx);
    let task = {
        let shutdown = shutdown.clone();
        let client_gone = client_gone.clone();
        tokio::spawn(
            async move { run_subscriber(&ctx, cursor, sink, shutdown, client_gone).await },
        )
    };
    (task, shutdown, client_gone)
}

// ============================================================================
// Attach paths
// ============================================================================

#[tokio::test]
async fn test_live_attach_receives_new_frames() {
    let ctx = context(DispatcherConfig::default());
    let sink = TestSink::default();
    let (task, shutdown, _) = spawn_subscriber(&ctx, None, sink.clone());

    wait_until(|| ctx.dispatcher.subscriber_count() == 1).await;
    admit_range(&ctx, 1..=3);
    wait_until(|| sink.len() == 3).await;

    shutdown.cancel();
    assert_eq!(task.await.unwrap(), DisconnectReason::Shutdown);
    assert_eq!(sink.seqs(), vec![1, 2, 3]);
    assert!(sink.closed.load(Ordering::Relaxed));
    assert_eq!(ctx.dispatcher.subscriber_count(), 0);
}

#[tokio::test]
async fn test_replay_then_live() {
    let ctx = context(DispatcherConfig::default());
    admit_range(&ctx, 1..=10);

    let sink = TestSink::default();
    let (task, shutdown, _) = spawn_subscriber(&ctx, Some(1), sink.clone());

    wait_until(|| sink.len() == 10).await;
    admit_range(&ctx, 11..=12);
    wait_until(|| sink.len() == 12).await;

    shutdown.cancel();
    task.await.unwrap();
    assert_eq!(sink.seqs(), (1..=12).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_cursor_at_window_head_replays_everything() {
    let ctx = context(DispatcherConfig::default());
    admit_range(&ctx, 5..=10);

    let sink = TestSink::default();
    let (task, shutdown, _) = spawn_subscriber(&ctx, Some(5), sink.clone());

    wait_until(|| sink.len() == 6).await;
    shutdown.cancel();
    task.await.unwrap();
    assert_eq!(sink.seqs(), (5..=10).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_cursor_just_past_tail_goes_live() {
    let ctx = context(DispatcherConfig::default());
    admit_range(&ctx, 1..=10);

    let sink = TestSink::default();
    let (task, shutdown, _) = spawn_subscriber(&ctx, Some(11), sink.clone());

    wait_until(|| ctx.dispatcher.subscriber_count() == 1).await;
    admit_range(&ctx, 11..=11);
    wait_until(|| sink.len() == 1).await;

    shutdown.cancel();
    task.await.unwrap();
    assert_eq!(sink.seqs(), vec![11]);
}

// ============================================================================
// Cursor rejection
// ============================================================================

#[tokio::test]
async fn test_outdated_cursor_rejected() {
    let ctx = context(DispatcherConfig::default());
    // Window starts at 5; cursor 4 fell out of retention.
    admit_range(&ctx, 5..=10);

    let sink = TestSink::default();
    let (task, _, _) = spawn_subscriber(&ctx, Some(4), sink.clone());

    assert_eq!(task.await.unwrap(), DisconnectReason::OutdatedCursor);
    let sent = sink.sent.lock();
    assert_eq!(sent.len(), 1);
    assert!(matches!(
        sent[0],
        Frame::Info {
            code: InfoCode::OutdatedCursor,
            ..
        }
    ));
    assert!(sink.closed.load(Ordering::Relaxed));
}

#[tokio::test]
async fn test_outdated_cursor_with_empty_window() {
    // Restart in memory mode: the cursor file knows seq 100 but nothing
    // is cached yet.
    let ctx = context(DispatcherConfig::default());
    ctx.latest_seq.store(100, Ordering::Release);

    let sink = TestSink::default();
    let (task, _, _) = spawn_subscriber(&ctx, Some(50), sink.clone());

    assert_eq!(task.await.unwrap(), DisconnectReason::OutdatedCursor);
}

#[tokio::test]
async fn test_future_cursor_rejected() {
    let ctx = context(DispatcherConfig::default());
    admit_range(&ctx, 1..=10);

    let sink = TestSink::default();
    let (task, _, _) = spawn_subscriber(&ctx, Some(12), sink.clone());

    assert_eq!(task.await.unwrap(), DisconnectReason::FutureCursor);
    let sent = sink.sent.lock();
    assert_eq!(sent.len(), 1);
    assert!(matches!(
        sent[0],
        Frame::Error {
            code: ErrorCode::FutureCursor,
            ..
        }
    ));
}

// ============================================================================
// Backpressure and cancellation
// ============================================================================

#[tokio::test]
async fn test_stuck_consumer_is_evicted() {
    let ctx = context(DispatcherConfig {
        queue_frames: 4,
        queue_bytes: 1024 * 1024,
    });

    let shutdown = CancellationToken::new();
    let client_gone = CancellationToken::new();
    let task = {
        let ctx = Arc::clone(&ctx);
        let shutdown = shutdown.clone();
        let client_gone = client_gone.clone();
        tokio::spawn(async move {
            run_subscriber(&ctx, None, StuckSink, shutdown, client_gone).await
        })
    };

    wait_until(|| ctx.dispatcher.subscriber_count() == 1).await;
    // One frame stuck in the sink, four in the queue, the next overflows.
    for seq in 1..=6 {
        ctx.dispatcher
            .admit(seq, Bytes::from_static(b"x"), SystemTime::now())
            .unwrap();
    }

    assert_eq!(task.await.unwrap(), DisconnectReason::ConsumerTooSlow);
    assert_eq!(ctx.dispatcher.subscriber_count(), 0);
    assert_eq!(ctx.metrics.snapshot().subscribers_evicted, 1);
}

#[tokio::test]
async fn test_write_deadline_evicts() {
    let cache = Arc::new(SequenceCache::memory(CacheConfig::default()));
    let metrics = Arc::new(RelayMetrics::new());
    let dispatcher = Arc::new(Dispatcher::new(
        cache,
        DispatcherConfig::default(),
        Arc::clone(&metrics),
    ));
    let ctx = Arc::new(SubscriberContext {
        dispatcher,
        latest_seq: Arc::new(AtomicU64::new(0)),
        limits: SubscriberLimits {
            write_deadline: Duration::from_millis(50),
        },
        metrics,
    });

    let shutdown = CancellationToken::new();
    let client_gone = CancellationToken::new();
    let task = {
        let ctx = Arc::clone(&ctx);
        let shutdown = shutdown.clone();
        let client_gone = client_gone.clone();
        tokio::spawn(async move {
            run_subscriber(&ctx, None, StuckSink, shutdown, client_gone).await
        })
    };

    wait_until(|| ctx.dispatcher.subscriber_count() == 1).await;
    ctx.dispatcher
        .admit(1, Bytes::from_static(b"x"), SystemTime::now())
        .unwrap();

    assert_eq!(task.await.unwrap(), DisconnectReason::ConsumerTooSlow);
}

#[tokio::test]
async fn test_client_close_ends_session() {
    let ctx = context(DispatcherConfig::default());
    let sink = TestSink::default();
    let (task, _, client_gone) = spawn_subscriber(&ctx, None, sink.clone());

    wait_until(|| ctx.dispatcher.subscriber_count() == 1).await;
    client_gone.cancel();

    assert_eq!(task.await.unwrap(), DisconnectReason::ClientClosed);
    assert_eq!(ctx.dispatcher.subscriber_count(), 0);
}

// ============================================================================
// Ordering property across the replay/live boundary
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_duplicates_or_gaps_across_boundary() {
    let ctx = context(DispatcherConfig::default());
    admit_range(&ctx, 1..=100);

    let sink = TestSink::default();
    let (task, shutdown, _) = spawn_subscriber(&ctx, Some(1), sink.clone());

    // Admissions race the replay; the merge must not duplicate or skip.
    let feeder = {
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            for seq in 101..=150 {
                ctx.dispatcher
                    .admit(seq, Bytes::from(format!("frame-{seq}")), SystemTime::now())
                    .unwrap();
                ctx.latest_seq.store(seq, Ordering::Release);
                if seq % 10 == 0 {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }
        })
    };

    feeder.await.unwrap();
    wait_until(|| sink.len() >= 150).await;

    shutdown.cancel();
    task.await.unwrap();
    assert_eq!(sink.seqs(), (1..=150).collect::<Vec<_>>());
}
