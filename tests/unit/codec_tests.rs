//! Unit tests for the NDJSON framing codec.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use clawless::acp::codec::{NdjsonCodec, MAX_FRAME_BYTES};
use clawless::AppError;

#[test]
fn single_frame_decodes_without_newline() {
    let mut codec = NdjsonCodec::new();
    let mut buf = BytesMut::from("{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n");

    let line = codec
        .decode(&mut buf)
        .expect("decode must succeed")
        .expect("a complete line must be returned");

    assert_eq!(line, "{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}");
}

#[test]
fn batched_frames_decode_individually() {
    let mut codec = NdjsonCodec::new();
    let mut buf = BytesMut::from("{\"id\":1,\"result\":{}}\n{\"id\":2,\"result\":{}}\n");

    assert!(codec.decode(&mut buf).expect("first").is_some());
    assert!(codec.decode(&mut buf).expect("second").is_some());
    assert!(codec.decode(&mut buf).expect("empty").is_none());
}

#[test]
fn partial_frame_buffers_until_newline() {
    let mut codec = NdjsonCodec::new();
    let mut buf = BytesMut::from("{\"id\":1,");

    assert!(
        codec.decode(&mut buf).expect("partial must not error").is_none(),
        "incomplete line must not be emitted"
    );

    buf.extend_from_slice(b"\"result\":{}}\n");
    assert!(codec.decode(&mut buf).expect("complete").is_some());
}

#[test]
fn oversized_frame_is_rejected() {
    let mut codec = NdjsonCodec::new();
    let big = "x".repeat(MAX_FRAME_BYTES + 1) + "\n";
    let mut buf = BytesMut::from(big.as_str());

    match codec.decode(&mut buf) {
        Err(AppError::Acp(msg)) => {
            assert!(msg.contains("frame too long"), "got: {msg}");
        }
        other => panic!("expected Err(AppError::Acp), got {other:?}"),
    }
}

#[test]
fn encode_appends_newline() {
    let mut codec = NdjsonCodec::new();
    let mut buf = BytesMut::new();

    codec
        .encode("{\"id\":1}".to_owned(), &mut buf)
        .expect("encode must succeed");

    assert_eq!(&buf[..], b"{\"id\":1}\n");
}
