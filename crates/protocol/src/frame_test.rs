//! Tests for the frame codec

use super::*;
use bytes::{BufMut, Bytes, BytesMut};

// ============================================================================
// Round trips
// ============================================================================

#[test]
fn test_message_round_trip() {
    let frame = Frame::message(42, Bytes::from_static(b"hello"));
    let decoded = Frame::decode(frame.encode()).unwrap();

    assert_eq!(decoded, frame);
    assert_eq!(decoded.kind(), FrameKind::Message);
    assert_eq!(decoded.seq(), Some(42));
    assert_eq!(decoded.body().as_ref(), b"hello");
}

#[test]
fn test_message_empty_body() {
    let frame = Frame::message(1, Bytes::new());
    let decoded = Frame::decode(frame.encode()).unwrap();

    assert_eq!(decoded.seq(), Some(1));
    assert!(decoded.body().is_empty());
}

#[test]
fn test_info_round_trip() {
    let frame = Frame::info(InfoCode::OutdatedCursor, "cursor evicted");
    let decoded = Frame::decode(frame.encode()).unwrap();

    assert_eq!(decoded, frame);
    assert_eq!(decoded.kind(), FrameKind::Info);
    assert_eq!(decoded.seq(), None);
}

#[test]
fn test_error_round_trip() {
    let frame = Frame::error(ErrorCode::ConsumerTooSlow, "queue overflow");
    let decoded = Frame::decode(frame.encode()).unwrap();

    assert_eq!(decoded, frame);
    assert_eq!(decoded.kind(), FrameKind::Error);
}

#[test]
fn test_encoded_len_matches() {
    let frames = [
        Frame::message(7, Bytes::from_static(b"abc")),
        Frame::info(InfoCode::UpstreamDisconnected, "flap"),
        Frame::error(ErrorCode::FutureCursor, ""),
    ];

    for frame in frames {
        assert_eq!(frame.encode().len(), frame.encoded_len());
    }
}

#[test]
fn test_max_seq_round_trip() {
    let frame = Frame::message(u64::MAX, Bytes::from_static(b"x"));
    let decoded = Frame::decode(frame.encode()).unwrap();
    assert_eq!(decoded.seq(), Some(u64::MAX));
}

// ============================================================================
// Decode failures
// ============================================================================

#[test]
fn test_decode_empty() {
    assert_eq!(
        Frame::decode(Bytes::new()),
        Err(CodecError::Truncated("kind"))
    );
}

#[test]
fn test_decode_unknown_kind() {
    assert_eq!(
        Frame::decode(Bytes::from_static(&[0x7f])),
        Err(CodecError::UnknownKind(0x7f))
    );
}

#[test]
fn test_decode_truncated_seq() {
    // Message kind with only 3 bytes of seq
    assert_eq!(
        Frame::decode(Bytes::from_static(&[0x01, 0, 0, 0])),
        Err(CodecError::Truncated("seq"))
    );
}

#[test]
fn test_decode_truncated_body_length() {
    let mut buf = BytesMut::new();
    buf.put_u8(0x01);
    buf.put_u64(5);
    buf.put_u8(0); // only 1 of 4 length bytes
    assert_eq!(
        Frame::decode(buf.freeze()),
        Err(CodecError::Truncated("body length"))
    );
}

#[test]
fn test_decode_body_shorter_than_declared() {
    let mut buf = BytesMut::new();
    buf.put_u8(0x01);
    buf.put_u64(5);
    buf.put_u32(10);
    buf.put_slice(b"short");
    assert_eq!(
        Frame::decode(buf.freeze()),
        Err(CodecError::BodyLengthMismatch {
            declared: 10,
            actual: 5
        })
    );
}

#[test]
fn test_decode_trailing_bytes_rejected() {
    let mut buf = BytesMut::new();
    buf.put_u8(0x01);
    buf.put_u64(5);
    buf.put_u32(2);
    buf.put_slice(b"okEXTRA");
    assert!(matches!(
        Frame::decode(buf.freeze()),
        Err(CodecError::BodyLengthMismatch { .. })
    ));
}

#[test]
fn test_decode_oversized_body() {
    let mut buf = BytesMut::new();
    buf.put_u8(0x01);
    buf.put_u64(5);
    buf.put_u32(MAX_BODY_LEN + 1);
    assert!(matches!(
        Frame::decode(buf.freeze()),
        Err(CodecError::BodyTooLarge { .. })
    ));
}

#[test]
fn test_decode_unknown_info_code() {
    let mut buf = BytesMut::new();
    buf.put_u8(0x02);
    buf.put_u8(0xee);
    buf.put_u32(0);
    assert_eq!(
        Frame::decode(buf.freeze()),
        Err(CodecError::UnknownInfoCode(0xee))
    );
}

#[test]
fn test_decode_unknown_error_code() {
    let mut buf = BytesMut::new();
    buf.put_u8(0x03);
    buf.put_u8(0xee);
    buf.put_u32(0);
    assert_eq!(
        Frame::decode(buf.freeze()),
        Err(CodecError::UnknownErrorCode(0xee))
    );
}
