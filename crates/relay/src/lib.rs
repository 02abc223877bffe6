//! Manifold Relay - Ingest, dispatch, and fan-out engine
//!
//! This crate is the core of the relay: one upstream client feeding a
//! dispatcher that persists sequenced frames to the cache and fans them
//! out to any number of downstream subscribers, each with its own bounded
//! queue and replay cursor.
//!
//! # Architecture
//!
//! ```text
//! Upstream firehose ──► UpstreamClient ──► Dispatcher
//!                                             │
//!                               ┌─────────────┼──────────────┐
//!                               ▼             ▼              ▼
//!                         SequenceCache   Subscriber ... Subscriber
//!                               ▲             ▲
//!                               │    replay   │ attach
//!                               └──────── Frontend (WebSocket)
//!
//! UpstreamClient ──► cursor task (coalesced cursor file writes)
//! ```
//!
//! Ordering contract: a Message frame becomes visible to subscribers only
//! after the cache has acknowledged it, and every subscriber sees Message
//! frames in strictly increasing `seq` order with no duplicates.

mod cursor;
mod dispatcher;
mod error;
mod frontend;
mod metrics;
mod sink;
mod subscriber;
mod upstream;

pub use cursor::{load_cursor, run_cursor_task};
pub use dispatcher::{Dispatcher, DispatcherConfig, Subscription};
pub use error::{RelayError, Result};
pub use frontend::{FrontendState, router, serve_frontend};
pub use metrics::{MetricsSnapshot, RelayMetrics};
pub use sink::FrameSink;
pub use subscriber::{DisconnectReason, SubscriberContext, SubscriberLimits, run_subscriber};
pub use upstream::{Backoff, UpstreamClient, UpstreamOptions};
