//! Complete frames: header plus payload.

use bytes::{Bytes, BytesMut};

use crate::{FrameHeader, Opcode, ProtocolError, Result};

/// A header and its payload.
///
/// Construct with [`Frame::new`], which fills in the payload size and the
/// checksum. If the header is changed afterwards, call [`Frame::reseal`]
/// before encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame header.
    pub header: FrameHeader,
    /// Raw payload bytes (CBOR).
    pub payload: Bytes,
}

impl Frame {
    /// Build a frame, sealing the header over `payload`.
    pub fn new(header: FrameHeader, payload: impl Into<Bytes>) -> Self {
        let mut frame = Self { header, payload: payload.into() };
        frame.reseal();
        frame
    }

    /// Recompute payload size and checksum after a header change.
    pub fn reseal(&mut self) {
        // Payload length is bounded by MAX_PAYLOAD_SIZE on every path that
        // produces frames, which fits in u32.
        let size = u32::try_from(self.payload.len()).unwrap_or(u32::MAX);
        self.header.set_payload_size(size);
        let checksum = checksum(&self.header, &self.payload);
        self.header.set_checksum(checksum);
    }

    /// Opcode of this frame.
    pub fn opcode(&self) -> Option<Opcode> {
        self.header.opcode_enum()
    }

    /// Total encoded length.
    pub fn encoded_len(&self) -> usize {
        FrameHeader::SIZE + self.payload.len()
    }

    /// Append the encoded frame to `dst`.
    pub fn encode(&self, dst: &mut Vec<u8>) -> Result<()> {
        if self.payload.len() > FrameHeader::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE,
            });
        }
        dst.reserve(self.encoded_len());
        dst.extend_from_slice(&self.header.to_bytes());
        dst.extend_from_slice(&self.payload);
        Ok(())
    }

    /// Encode into a shareable buffer.
    ///
    /// Used by fan-out paths that hand the same bytes to many writers.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    /// Decode exactly one frame from `buf`.
    ///
    /// Trailing bytes beyond the declared payload are ignored.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let header = FrameHeader::from_bytes(buf)?;
        let total = FrameHeader::SIZE + header.payload_size() as usize;
        let body = buf
            .get(FrameHeader::SIZE..total)
            .ok_or(ProtocolError::FrameTooShort { expected: total, actual: buf.len() })?;

        let computed = checksum(&header, body);
        if computed != header.checksum() {
            return Err(ProtocolError::ChecksumMismatch {
                expected: header.checksum(),
                actual: computed,
            });
        }

        Ok(Self { header, payload: Bytes::copy_from_slice(body) })
    }

    /// Split one complete frame off the front of a stream buffer.
    ///
    /// Returns `Ok(None)` while the buffer holds only part of a frame. Errors
    /// are fatal for the stream: once a header fails validation the byte
    /// stream can no longer be re-synchronized.
    pub fn split_from(buf: &mut BytesMut) -> Result<Option<Self>> {
        if buf.len() < FrameHeader::SIZE {
            return Ok(None);
        }
        let header = FrameHeader::from_bytes(&buf[..])?;
        let total = FrameHeader::SIZE + header.payload_size() as usize;
        if buf.len() < total {
            buf.reserve(total - buf.len());
            return Ok(None);
        }

        let raw = buf.split_to(total).freeze();
        let payload = raw.slice(FrameHeader::SIZE..);

        let computed = checksum(&header, &payload);
        if computed != header.checksum() {
            return Err(ProtocolError::ChecksumMismatch {
                expected: header.checksum(),
                actual: computed,
            });
        }

        Ok(Some(Self { header, payload }))
    }
}

fn checksum(header: &FrameHeader, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(header.checksummed_prefix());
    hasher.update(payload);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn state_frame(sequence: u64, payload: &'static [u8]) -> Frame {
        let mut header = FrameHeader::new(Opcode::State);
        header.set_sequence(sequence);
        Frame::new(header, Bytes::from_static(payload))
    }

    #[test]
    fn new_seals_size_and_checksum() {
        let frame = state_frame(1, b"abc");
        assert_eq!(frame.header.payload_size(), 3);
        assert_ne!(frame.header.checksum(), 0);
    }

    #[test]
    fn decode_detects_corrupted_payload() {
        let frame = state_frame(3, b"hello");
        let mut buf = Vec::new();
        frame.encode(&mut buf).unwrap();

        let last = buf.len() - 1;
        buf[last] ^= 0xff;

        assert!(matches!(Frame::decode(&buf), Err(ProtocolError::ChecksumMismatch { .. })));
    }

    #[test]
    fn decode_detects_header_tampering() {
        let frame = state_frame(3, b"hello");
        let mut buf = Vec::new();
        frame.encode(&mut buf).unwrap();

        // Sequence lives at 8..16 and is covered by the checksum.
        buf[15] ^= 0x01;

        assert!(matches!(Frame::decode(&buf), Err(ProtocolError::ChecksumMismatch { .. })));
    }

    #[test]
    fn reseal_after_header_change() {
        let mut frame = state_frame(1, b"x");
        frame.header.set_origin(99);
        frame.reseal();

        let bytes = frame.to_bytes().unwrap();
        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(decoded.header.origin(), 99);
    }

    #[test]
    fn split_from_waits_for_complete_frame() {
        let bytes = state_frame(5, b"payload").to_bytes().unwrap();
        let mut buf = BytesMut::new();

        buf.extend_from_slice(&bytes[..10]);
        assert_eq!(Frame::split_from(&mut buf).unwrap(), None);

        buf.extend_from_slice(&bytes[10..bytes.len() - 1]);
        assert_eq!(Frame::split_from(&mut buf).unwrap(), None);

        buf.extend_from_slice(&bytes[bytes.len() - 1..]);
        let frame = Frame::split_from(&mut buf).unwrap().unwrap();
        assert_eq!(frame.header.sequence(), 5);
        assert!(buf.is_empty());
    }

    #[test]
    fn split_from_keeps_following_frames_intact() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&state_frame(1, b"one").to_bytes().unwrap());
        buf.extend_from_slice(&state_frame(2, b"two").to_bytes().unwrap());

        let first = Frame::split_from(&mut buf).unwrap().unwrap();
        let second = Frame::split_from(&mut buf).unwrap().unwrap();

        assert_eq!(first.payload.as_ref(), b"one");
        assert_eq!(second.payload.as_ref(), b"two");
        assert_eq!(Frame::split_from(&mut buf).unwrap(), None);
    }

    proptest! {
        #[test]
        fn decode_never_panics_on_garbage(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = Frame::decode(&bytes);
            let mut buf = BytesMut::from(&bytes[..]);
            let _ = Frame::split_from(&mut buf);
        }
    }
}
