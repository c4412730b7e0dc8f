//! Fuzz target for frame decoding
//!
//! Hostile bytes from the network must never panic the reader or be handed
//! out as a frame unless they are one.
//!
//! # Strategy
//!
//! - Raw bytes: fed to `Frame::decode` directly
//! - Stream chunks: the same bytes split at arbitrary points and fed to
//!   `Frame::split_from`, as a socket would deliver them
//!
//! # Invariants
//!
//! - NEVER panic on malformed input
//! - A decoded frame re-encodes to exactly the bytes it was decoded from
//! - Chunked and one-shot decoding agree on the first frame
//! - `split_from` never consumes bytes it does not return

#![no_main]

use arbitrary::Arbitrary;
use bytes::BytesMut;
use dgr_proto::{Frame, FrameHeader, Payload};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    bytes: Vec<u8>,
    /// Chunk sizes for stream delivery; zero entries are skipped.
    chunks: Vec<u8>,
}

fuzz_target!(|input: FuzzInput| {
    let one_shot = Frame::decode(&input.bytes);

    if let Ok(frame) = &one_shot {
        let mut encoded = Vec::new();
        frame.encode(&mut encoded).unwrap();
        assert_eq!(encoded[..], input.bytes[..frame.encoded_len()]);
        assert!(frame.payload.len() <= FrameHeader::MAX_PAYLOAD_SIZE);

        // payload decoding may fail, but must not panic
        let _ = Payload::from_frame(frame);
    }

    let mut buf = BytesMut::new();
    let mut rest = &input.bytes[..];
    let mut chunks = input.chunks.iter().map(|&c| usize::from(c)).filter(|&c| c > 0);

    let streamed = loop {
        let before = buf.len();
        match Frame::split_from(&mut buf) {
            Ok(Some(frame)) => break Some(Ok(frame)),
            Ok(None) => assert_eq!(buf.len(), before),
            Err(e) => break Some(Err(e)),
        }
        if rest.is_empty() {
            break None;
        }
        let take = chunks.next().unwrap_or(rest.len()).min(rest.len());
        buf.extend_from_slice(&rest[..take]);
        rest = &rest[take..];
    };

    match (one_shot, streamed) {
        (Ok(a), Some(Ok(b))) => assert_eq!(a, b),
        (Ok(_), other) => panic!("one-shot decoded a frame, stream gave {other:?}"),
        (Err(_), Some(Ok(frame))) => panic!("stream decoded {frame:?}, one-shot failed"),
        (Err(_), _) => {},
    }
});
