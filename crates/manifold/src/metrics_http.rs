//! Metrics and health listener
//!
//! A second, operator-facing HTTP listener: `GET /healthz` for liveness
//! probes and `GET /metrics` in Prometheus text exposition format. Kept
//! off the subscriber listener so scrapes never contend with the fan-out
//! path.

use std::io;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::routing::get;
use manifold_cache::SequenceCache;
use manifold_relay::{Dispatcher, MetricsSnapshot, RelayMetrics};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Clone)]
struct MetricsState {
    metrics: Arc<RelayMetrics>,
    cache: Arc<SequenceCache>,
    dispatcher: Arc<Dispatcher>,
}

/// Serve `/healthz` and `/metrics` until cancelled
pub async fn serve(
    listener: tokio::net::TcpListener,
    metrics: Arc<RelayMetrics>,
    cache: Arc<SequenceCache>,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
) -> io::Result<()> {
    let state = MetricsState {
        metrics,
        cache,
        dispatcher,
    };
    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    info!(addr = ?listener.local_addr().ok(), "metrics listener ready");
    axum::serve(listener, router)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
}

async fn healthz() -> impl IntoResponse {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

async fn metrics_handler(State(state): State<MetricsState>) -> impl IntoResponse {
    let body = render(
        &state.metrics.snapshot(),
        state.cache.bounds(),
        state.cache.bytes_used(),
        state.dispatcher.subscriber_count(),
    );
    ([(CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

fn render(
    snapshot: &MetricsSnapshot,
    bounds: Option<(u64, u64)>,
    bytes_used: u64,
    subscribers: usize,
) -> String {
    let (seq_lo, seq_hi) = bounds.unwrap_or((0, 0));
    let mut out = String::with_capacity(1024);

    let counters: [(&str, &str, u64); 6] = [
        (
            "manifold_frames_ingested_total",
            "Message frames admitted to the cache",
            snapshot.frames_ingested,
        ),
        (
            "manifold_frames_broadcast_total",
            "Frame deliveries enqueued to subscribers",
            snapshot.frames_broadcast,
        ),
        (
            "manifold_frames_replay_dropped_total",
            "Upstream frames dropped by the idempotent seq guard",
            snapshot.frames_dropped_replay,
        ),
        (
            "manifold_subscribers_evicted_total",
            "Subscribers evicted for backpressure",
            snapshot.subscribers_evicted,
        ),
        (
            "manifold_upstream_reconnects_total",
            "Upstream reconnect attempts",
            snapshot.upstream_reconnects,
        ),
        (
            "manifold_storage_errors_total",
            "Cache admission failures",
            snapshot.storage_errors,
        ),
    ];
    for (name, help, value) in counters {
        out.push_str(&format!(
            "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n"
        ));
    }

    let gauges: [(&str, &str, u64); 4] = [
        (
            "manifold_subscribers_connected",
            "Currently connected subscribers",
            subscribers as u64,
        ),
        (
            "manifold_cache_seq_lo",
            "Oldest retained sequence",
            seq_lo,
        ),
        (
            "manifold_cache_seq_hi",
            "Newest retained sequence",
            seq_hi,
        ),
        (
            "manifold_cache_bytes",
            "Body bytes currently retained",
            bytes_used,
        ),
    ];
    for (name, help, value) in gauges {
        out.push_str(&format!(
            "# HELP {name} {help}\n# TYPE {name} gauge\n{name} {value}\n"
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_exposition_format() {
        let snapshot = MetricsSnapshot {
            frames_ingested: 100,
            frames_broadcast: 250,
            frames_dropped_replay: 3,
            subscribers_connected: 2,
            subscribers_evicted: 1,
            upstream_reconnects: 4,
            storage_errors: 0,
        };

        let body = render(&snapshot, Some((17, 117)), 4096, 2);

        assert!(body.contains("# TYPE manifold_frames_ingested_total counter"));
        assert!(body.contains("manifold_frames_ingested_total 100"));
        assert!(body.contains("manifold_frames_broadcast_total 250"));
        assert!(body.contains("manifold_subscribers_connected 2"));
        assert!(body.contains("manifold_cache_seq_lo 17"));
        assert!(body.contains("manifold_cache_seq_hi 117"));
        assert!(body.contains("manifold_cache_bytes 4096"));
    }

    #[test]
    fn test_render_empty_window() {
        let body = render(&MetricsSnapshot::default(), None, 0, 0);
        assert!(body.contains("manifold_cache_seq_lo 0"));
        assert!(body.contains("manifold_cache_seq_hi 0"));
    }
}
