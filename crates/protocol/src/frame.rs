//! Frame envelope and binary codec
//!
//! The envelope is deliberately small: a one-byte kind, a sequence number
//! for `Message` frames, a one-byte code for `Info`/`Error` frames, and a
//! length-prefixed opaque body. Sequence numbers are assigned by the
//! upstream producer and are strictly monotonically increasing.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CodecError, Result};

/// Frame kind discriminants
const KIND_MESSAGE: u8 = 0x01;
const KIND_INFO: u8 = 0x02;
const KIND_ERROR: u8 = 0x03;

/// Maximum body size accepted on decode (64 MiB)
pub const MAX_BODY_LEN: u32 = 64 * 1024 * 1024;

/// Discriminant of a frame, without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Message,
    Info,
    Error,
}

/// Advisory codes carried by `Info` frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InfoCode {
    /// The requested cursor has been evicted from the retention window
    OutdatedCursor = 1,
    /// The relay lost its upstream connection; live frames are paused
    UpstreamDisconnected = 2,
}

impl InfoCode {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::OutdatedCursor),
            2 => Some(Self::UpstreamDisconnected),
            _ => None,
        }
    }
}

/// Terminal codes carried by `Error` frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    /// The requested cursor is ahead of the newest known sequence
    FutureCursor = 1,
    /// The subscriber's outbound queue overflowed
    ConsumerTooSlow = 2,
}

impl ErrorCode {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::FutureCursor),
            2 => Some(Self::ConsumerTooSlow),
            _ => None,
        }
    }
}

/// One envelope-delimited unit of the relay wire protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Sequenced firehose event; cached, replayed, and live-tailed
    Message { seq: u64, body: Bytes },
    /// Advisory notice; broadcast only, never persisted
    Info { code: InfoCode, body: Bytes },
    /// Terminal notice; the connection closes after delivery
    Error { code: ErrorCode, body: Bytes },
}

impl Frame {
    /// Build a Message frame
    pub fn message(seq: u64, body: impl Into<Bytes>) -> Self {
        Frame::Message {
            seq,
            body: body.into(),
        }
    }

    /// Build an Info frame with a human-readable note
    pub fn info(code: InfoCode, note: &str) -> Self {
        Frame::Info {
            code,
            body: Bytes::copy_from_slice(note.as_bytes()),
        }
    }

    /// Build an Error frame with a human-readable note
    pub fn error(code: ErrorCode, note: &str) -> Self {
        Frame::Error {
            code,
            body: Bytes::copy_from_slice(note.as_bytes()),
        }
    }

    /// Get the frame kind
    #[inline]
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Message { .. } => FrameKind::Message,
            Frame::Info { .. } => FrameKind::Info,
            Frame::Error { .. } => FrameKind::Error,
        }
    }

    /// Get the sequence number (Message frames only)
    #[inline]
    pub fn seq(&self) -> Option<u64> {
        match self {
            Frame::Message { seq, .. } => Some(*seq),
            _ => None,
        }
    }

    /// Get the opaque body bytes
    #[inline]
    pub fn body(&self) -> &Bytes {
        match self {
            Frame::Message { body, .. } | Frame::Info { body, .. } | Frame::Error { body, .. } => {
                body
            }
        }
    }

    /// Size of the encoded frame in bytes
    pub fn encoded_len(&self) -> usize {
        let header = match self {
            Frame::Message { .. } => 1 + 8 + 4,
            Frame::Info { .. } | Frame::Error { .. } => 1 + 1 + 4,
        };
        header + self.body().len()
    }

    /// Encode the frame to a contiguous byte buffer
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());

        match self {
            Frame::Message { seq, body } => {
                buf.put_u8(KIND_MESSAGE);
                buf.put_u64(*seq);
                buf.put_u32(body.len() as u32);
                buf.put_slice(body);
            }
            Frame::Info { code, body } => {
                buf.put_u8(KIND_INFO);
                buf.put_u8(*code as u8);
                buf.put_u32(body.len() as u32);
                buf.put_slice(body);
            }
            Frame::Error { code, body } => {
                buf.put_u8(KIND_ERROR);
                buf.put_u8(*code as u8);
                buf.put_u32(body.len() as u32);
                buf.put_slice(body);
            }
        }

        buf.freeze()
    }

    /// Decode a frame from a complete message payload
    ///
    /// The payload must contain exactly one frame; trailing bytes are a
    /// length mismatch error.
    pub fn decode(mut buf: Bytes) -> Result<Self> {
        if buf.is_empty() {
            return Err(CodecError::Truncated("kind"));
        }

        let kind = buf.get_u8();
        match kind {
            KIND_MESSAGE => {
                if buf.remaining() < 8 {
                    return Err(CodecError::Truncated("seq"));
                }
                let seq = buf.get_u64();
                let body = decode_body(&mut buf)?;
                Ok(Frame::Message { seq, body })
            }
            KIND_INFO => {
                if buf.remaining() < 1 {
                    return Err(CodecError::Truncated("info code"));
                }
                let raw = buf.get_u8();
                let code = InfoCode::from_u8(raw).ok_or(CodecError::UnknownInfoCode(raw))?;
                let body = decode_body(&mut buf)?;
                Ok(Frame::Info { code, body })
            }
            KIND_ERROR => {
                if buf.remaining() < 1 {
                    return Err(CodecError::Truncated("error code"));
                }
                let raw = buf.get_u8();
                let code = ErrorCode::from_u8(raw).ok_or(CodecError::UnknownErrorCode(raw))?;
                let body = decode_body(&mut buf)?;
                Ok(Frame::Error { code, body })
            }
            other => Err(CodecError::UnknownKind(other)),
        }
    }
}

/// Read a length-prefixed body, enforcing the wire limit and exact length
fn decode_body(buf: &mut Bytes) -> Result<Bytes> {
    if buf.remaining() < 4 {
        return Err(CodecError::Truncated("body length"));
    }
    let len = buf.get_u32();

    if len > MAX_BODY_LEN {
        return Err(CodecError::BodyTooLarge {
            len,
            max: MAX_BODY_LEN,
        });
    }
    if buf.remaining() != len as usize {
        return Err(CodecError::BodyLengthMismatch {
            declared: len,
            actual: buf.remaining(),
        });
    }

    Ok(buf.split_to(len as usize))
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod tests;
