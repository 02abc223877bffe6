//! Delivery seam between the subscriber state machine and its transport
//!
//! The state machine only needs "write one frame" and "close"; keeping
//! that behind a trait lets the WebSocket transport live in the frontend
//! and lets tests drive the machine with an in-memory sink.

use std::io;

use async_trait::async_trait;
use manifold_protocol::Frame;

/// One subscriber's outbound transport
#[async_trait]
pub trait FrameSink: Send {
    /// Write a single frame; an error is fatal to the connection
    async fn send(&mut self, frame: &Frame) -> io::Result<()>;

    /// Close the transport, flushing best-effort
    async fn close(&mut self);
}
