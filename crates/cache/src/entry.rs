//! On-disk value layout
//!
//! Keys are big-endian `u64` sequence numbers so LMDB's lexicographic key
//! order is numeric order. Values carry a fixed 12-byte header followed by
//! the opaque frame body:
//!
//! ```text
//! ┌───────────────────────────┬────────────┬──────────┐
//! │ received_at_unix_nanos i64│ size: u32  │ body     │
//! └───────────────────────────┴────────────┴──────────┘
//! ```
//!
//! `size` duplicates the body length so a torn or foreign value is
//! detectable without trusting the store's length.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Fixed header length preceding the frame body
pub(crate) const VALUE_HEADER_LEN: usize = 8 + 4;

/// Encode a cache value from its admission time and body
pub(crate) fn encode_value(received_at_nanos: i64, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(VALUE_HEADER_LEN + body.len());
    buf.put_i64(received_at_nanos);
    buf.put_u32(body.len() as u32);
    buf.put_slice(body);
    buf.freeze()
}

/// Decode a cache value; `None` means the value is corrupt
pub(crate) fn decode_value(mut raw: &[u8]) -> Option<(i64, Bytes)> {
    if raw.len() < VALUE_HEADER_LEN {
        return None;
    }
    let received_at_nanos = raw.get_i64();
    let size = raw.get_u32() as usize;
    if raw.remaining() != size {
        return None;
    }
    Some((received_at_nanos, Bytes::copy_from_slice(raw)))
}

/// Decode only the header of a cache value; `None` means corrupt
pub(crate) fn decode_header(mut raw: &[u8]) -> Option<(i64, u32)> {
    if raw.len() < VALUE_HEADER_LEN {
        return None;
    }
    let received_at_nanos = raw.get_i64();
    let size = raw.get_u32();
    if raw.remaining() != size as usize {
        return None;
    }
    Some((received_at_nanos, size))
}

/// Convert a wall-clock instant to unix nanos, clamping pre-epoch to zero
pub(crate) fn to_unix_nanos(at: SystemTime) -> i64 {
    at.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos()
        .min(i64::MAX as u128) as i64
}

#[cfg(test)]
#[path = "entry_test.rs"]
mod tests;
