//! Upstream client - the single reconnecting firehose consumer
//!
//! Maintains exactly one live WebSocket connection to the upstream
//! producer, hands Message frames to the dispatcher synchronously with
//! cache admission, and only then advances `latest_known_seq` and the
//! (coalesced) cursor file.
//!
//! # Sequence guard
//!
//! Cursor writes are coalesced, so after a crash the upstream replays a
//! bounded tail of already-admitted frames; those arrive with
//! `seq <= latest_known_seq` and are dropped idempotently. A sequence
//! that regresses against what *this session* already delivered is a
//! protocol violation and tears the session down.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use futures_util::StreamExt;
use manifold_protocol::Frame;
use tokio::sync::watch;
use tokio::time::{Instant, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::RelayError;
use crate::metrics::RelayMetrics;

/// Upstream connection settings
#[derive(Debug, Clone)]
pub struct UpstreamOptions {
    /// Hostname (and optional port) of the firehose producer
    pub host: String,

    /// Use ws:// instead of wss://
    pub insecure: bool,

    /// Deadline for the connection handshake
    pub connect_timeout: Duration,

    /// Deadline for reading the next frame before the session is
    /// considered dead
    pub idle_timeout: Duration,

    /// Continuous disconnection beyond this broadcasts one
    /// upstream-disconnected notice to live subscribers
    pub grace: Duration,

    /// Initial reconnect backoff
    pub backoff_initial: Duration,

    /// Backoff cap
    pub backoff_max: Duration,
}

impl Default for UpstreamOptions {
    fn default() -> Self {
        Self {
            host: String::new(),
            insecure: false,
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
            grace: Duration::from_secs(30),
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
        }
    }
}

/// Doubling reconnect backoff with a cap
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now; doubles the next one up to the cap
    pub fn next(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    /// Back to the initial delay, after a productive session
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

enum SessionEnd {
    /// Shutdown signal observed
    Cancelled,
    /// Dispatcher halted Message ingest; no point reconnecting
    Halted,
    /// Connection ended; `delivered` counts frames admitted this session
    Disconnected { delivered: u64 },
}

enum FrameAction {
    Continue,
    FatalSession(String),
    Halted,
}

/// The single upstream firehose consumer
pub struct UpstreamClient {
    opts: UpstreamOptions,
    dispatcher: Arc<Dispatcher>,
    latest_seq: Arc<AtomicU64>,
    cursor_tx: watch::Sender<u64>,
    metrics: Arc<RelayMetrics>,
}

impl UpstreamClient {
    pub fn new(
        opts: UpstreamOptions,
        dispatcher: Arc<Dispatcher>,
        latest_seq: Arc<AtomicU64>,
        cursor_tx: watch::Sender<u64>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            opts,
            dispatcher,
            latest_seq,
            cursor_tx,
            metrics,
        }
    }

    /// Connect URL for the current resume point
    ///
    /// `latest_known_seq == 0` means no resume point: start at the
    /// upstream's current head.
    pub fn connect_url(&self) -> String {
        let scheme = if self.opts.insecure { "ws" } else { "wss" };
        let latest = self.latest_seq.load(Ordering::Acquire);
        if latest > 0 {
            format!("{scheme}://{}/events?cursor={latest}", self.opts.host)
        } else {
            format!("{scheme}://{}/events", self.opts.host)
        }
    }

    /// Run the reconnect loop until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        let mut backoff = Backoff::new(self.opts.backoff_initial, self.opts.backoff_max);
        let mut first_attempt = true;
        let mut outage_since: Option<Instant> = None;
        let mut outage_notified = false;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            if !first_attempt {
                self.metrics.record_reconnect();
            }
            first_attempt = false;

            match self.run_session(&cancel).await {
                SessionEnd::Cancelled => break,
                SessionEnd::Halted => {
                    error!("upstream client parked: message ingest is halted");
                    cancel.cancelled().await;
                    break;
                }
                SessionEnd::Disconnected { delivered } => {
                    if delivered > 0 {
                        backoff.reset();
                        outage_since = None;
                    }
                    if outage_since.is_none() {
                        outage_since = Some(Instant::now());
                        outage_notified = false;
                    }
                }
            }

            let delay = backoff.next();
            debug!(delay_secs = delay.as_secs(), "upstream reconnect backoff");

            // Wait out the backoff; if the outage outlives the grace
            // period while waiting, tell live subscribers once.
            let grace_at = outage_since
                .map(|t| t + self.opts.grace)
                .unwrap_or_else(Instant::now);
            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    _ = tokio::time::sleep_until(grace_at), if !outage_notified => {
                        outage_notified = true;
                        self.dispatcher.broadcast_info(
                            manifold_protocol::InfoCode::UpstreamDisconnected,
                            "upstream connection lost",
                        );
                    }
                    _ = cancel.cancelled() => return,
                }
            }
        }

        info!("upstream client stopped");
    }

    async fn run_session(&self, cancel: &CancellationToken) -> SessionEnd {
        let url = self.connect_url();
        debug!(url = %url, "connecting upstream");

        let mut ws = tokio::select! {
            connected = timeout(self.opts.connect_timeout, connect_async(&url)) => {
                match connected {
                    Ok(Ok((ws, _response))) => ws,
                    Ok(Err(e)) => {
                        warn!(host = %self.opts.host, error = %e, "upstream connect failed");
                        return SessionEnd::Disconnected { delivered: 0 };
                    }
                    Err(_) => {
                        warn!(host = %self.opts.host, "upstream connect timed out");
                        return SessionEnd::Disconnected { delivered: 0 };
                    }
                }
            }
            _ = cancel.cancelled() => return SessionEnd::Cancelled,
        };

        info!(host = %self.opts.host, "upstream connected");

        let mut delivered = 0u64;
        let mut session_high = 0u64;

        loop {
            let next = tokio::select! {
                next = timeout(self.opts.idle_timeout, ws.next()) => next,
                _ = cancel.cancelled() => {
                    let _ = ws.close(None).await;
                    return SessionEnd::Cancelled;
                }
            };

            let msg = match next {
                Err(_) => {
                    warn!("upstream idle timeout");
                    break;
                }
                Ok(None) => {
                    debug!("upstream stream ended");
                    break;
                }
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "upstream read error");
                    break;
                }
                Ok(Some(Ok(msg))) => msg,
            };

            match msg {
                Message::Binary(data) => match Frame::decode(data) {
                    Ok(frame) => {
                        match self.handle_frame(frame, &mut session_high, &mut delivered) {
                            FrameAction::Continue => {}
                            FrameAction::FatalSession(why) => {
                                warn!(why = %why, "fatal upstream protocol error, reconnecting");
                                let _ = ws.close(None).await;
                                break;
                            }
                            FrameAction::Halted => {
                                let _ = ws.close(None).await;
                                return SessionEnd::Halted;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "malformed upstream frame, reconnecting");
                        let _ = ws.close(None).await;
                        break;
                    }
                },
                Message::Close(_) => {
                    debug!("upstream sent close");
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Text(_) => debug!("ignoring text frame from upstream"),
                _ => {}
            }
        }

        SessionEnd::Disconnected { delivered }
    }

    fn handle_frame(
        &self,
        frame: Frame,
        session_high: &mut u64,
        delivered: &mut u64,
    ) -> FrameAction {
        match frame {
            Frame::Message { seq, body } => {
                if *session_high != 0 && seq <= *session_high {
                    return FrameAction::FatalSession(format!(
                        "sequence regressed to {seq} after {session_high}"
                    ));
                }
                *session_high = seq;

                let latest = self.latest_seq.load(Ordering::Acquire);
                if seq <= latest {
                    // Coalesced-cursor crash replay: already admitted.
                    self.metrics.record_replay_drop();
                    debug!(seq, latest, "dropping already-admitted frame");
                    return FrameAction::Continue;
                }

                match self.dispatcher.admit(seq, body, SystemTime::now()) {
                    Ok(()) => {
                        self.latest_seq.store(seq, Ordering::Release);
                        let _ = self.cursor_tx.send(seq);
                        *delivered += 1;
                        FrameAction::Continue
                    }
                    Err(RelayError::IngestHalted) => FrameAction::Halted,
                    Err(RelayError::Cache(e)) if e.is_ordering() => {
                        // Raced the guard; drop like any replayed frame.
                        warn!(seq, error = %e, "cache refused frame the guard passed");
                        FrameAction::Continue
                    }
                    Err(e) => FrameAction::FatalSession(e.to_string()),
                }
            }
            frame => {
                // Info/Error pass through to live subscribers unpersisted.
                self.dispatcher.broadcast_passthrough(frame);
                FrameAction::Continue
            }
        }
    }
}

#[cfg(test)]
#[path = "upstream_test.rs"]
mod tests;
