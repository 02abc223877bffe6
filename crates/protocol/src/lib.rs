//! Manifold Protocol - Frame envelope for the relay wire format
//!
//! Both sides of the relay speak the same envelope: the upstream firehose
//! producer and every downstream subscriber. A frame is one WebSocket
//! binary message (or any equivalent length-delimited unit); the relay
//! inspects only the envelope and treats the body as opaque bytes.
//!
//! # Wire Format
//!
//! All integers are big-endian:
//!
//! ```text
//! ┌──────────┬────────────────────┬──────────────┬──────────┐
//! │ kind: u8 │ seq: u64 (Message) │ body_len: u32│ body     │
//! │          │ code: u8 (Info/Err)│              │          │
//! └──────────┴────────────────────┴──────────────┴──────────┘
//! ```
//!
//! # Frame Kinds
//!
//! - `Message` (0x01): a sequenced firehose event; the only kind that is
//!   cached and replayed
//! - `Info` (0x02): advisory notice (outdated cursor, upstream flap)
//! - `Error` (0x03): terminal notice, the connection closes after it

mod error;
mod frame;

pub use error::{CodecError, Result};
pub use frame::{ErrorCode, Frame, FrameKind, InfoCode, MAX_BODY_LEN};
