//! Frontend - downstream subscriber intake
//!
//! Accepts WebSocket connections on the API listener, parses the optional
//! integer `cursor` query parameter, and hands the socket to the
//! subscriber state machine. Malformed cursors are rejected before the
//! upgrade with a 400; unknown query parameters are ignored. No
//! authentication happens at this layer.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use manifold_protocol::Frame;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::sink::FrameSink;
use crate::subscriber::{SubscriberContext, run_subscriber};

/// Shared state for the subscriber listener
#[derive(Clone)]
pub struct FrontendState {
    pub context: Arc<SubscriberContext>,
    /// Server-wide shutdown; each connection also watches it
    pub shutdown: CancellationToken,
}

/// Build the subscriber router
pub fn router(state: FrontendState) -> Router {
    Router::new()
        .route("/events", get(events_handler))
        .with_state(state)
}

/// Serve the subscriber listener until shutdown
pub async fn serve_frontend(
    listener: tokio::net::TcpListener,
    state: FrontendState,
) -> io::Result<()> {
    let shutdown = state.shutdown.clone();
    info!(addr = ?listener.local_addr().ok(), "subscriber listener ready");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

#[derive(Debug, Deserialize)]
struct EventsParams {
    cursor: Option<String>,
}

async fn events_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<EventsParams>,
    State(state): State<FrontendState>,
) -> Response {
    let cursor = match params.cursor {
        None => None,
        Some(raw) => match raw.parse::<u64>() {
            Ok(cursor) => Some(cursor),
            Err(_) => {
                debug!(cursor = %raw, "rejecting malformed cursor");
                return (
                    StatusCode::BAD_REQUEST,
                    "cursor must be a non-negative integer\n",
                )
                    .into_response();
            }
        },
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, cursor))
}

async fn handle_socket(socket: WebSocket, state: FrontendState, cursor: Option<u64>) {
    let (sender, mut receiver) = socket.split();

    // The state machine only writes; a side task drains the client's
    // inbound half so closes (and protocol pings) are noticed promptly.
    let client_gone = CancellationToken::new();
    let watcher_token = client_gone.clone();
    let watcher = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
        watcher_token.cancel();
    });

    let sink = WsFrameSink { inner: sender };
    let reason = run_subscriber(
        &state.context,
        cursor,
        sink,
        state.shutdown.clone(),
        client_gone,
    )
    .await;

    info!(?cursor, ?reason, "subscriber session ended");
    watcher.abort();
}

/// `FrameSink` over the write half of an axum WebSocket
struct WsFrameSink {
    inner: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn send(&mut self, frame: &Frame) -> io::Result<()> {
        self.inner
            .send(Message::Binary(frame.encode()))
            .await
            .map_err(io::Error::other)
    }

    async fn close(&mut self) {
        let _ = self.inner.send(Message::Close(None)).await;
        let _ = self.inner.flush().await;
    }
}
