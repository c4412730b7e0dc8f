//! CBOR payload types and their mapping to opcodes.

mod session;
mod state;

use bytes::Bytes;
pub use session::{Goodbye, Hello, PeerRole};
pub use state::{Report, SNAPSHOT_OVERHEAD, StateSnapshot, VARIABLE_OVERHEAD, WireVariable};

use crate::{Frame, FrameHeader, Opcode, ProtocolError, Result};

/// Decoded payload of any frame type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Handshake.
    Hello(Hello),
    /// Full state snapshot.
    State(StateSnapshot),
    /// Graceful disconnect.
    Bye(Goodbye),
    /// Slave reverse-channel message.
    Report(Report),
}

impl Payload {
    /// Opcode this payload is carried under.
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Hello(_) => Opcode::Hello,
            Self::State(_) => Opcode::State,
            Self::Bye(_) => Opcode::Bye,
            Self::Report(_) => Opcode::Report,
        }
    }

    /// Decode the payload of `frame` according to its opcode.
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let opcode = frame
            .header
            .opcode_enum()
            .ok_or(ProtocolError::UnknownOpcode(frame.header.opcode()))?;

        match opcode {
            Opcode::Hello => decode(&frame.payload).map(Self::Hello),
            Opcode::State => decode(&frame.payload).map(Self::State),
            Opcode::Bye => decode(&frame.payload).map(Self::Bye),
            Opcode::Report => decode(&frame.payload).map(Self::Report),
        }
    }

    /// Encode into a sealed frame.
    pub fn into_frame(self, sequence: u64, origin: u64) -> Result<Frame> {
        let mut header = FrameHeader::new(self.opcode());
        header.set_sequence(sequence);
        header.set_origin(origin);

        let body = match &self {
            Self::Hello(p) => encode(p)?,
            Self::State(p) => encode(p)?,
            Self::Bye(p) => encode(p)?,
            Self::Report(p) => encode(p)?,
        };

        if body.len() > FrameHeader::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: body.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE,
            });
        }

        Ok(Frame::new(header, Bytes::from(body)))
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).map_err(|e| ProtocolError::Cbor(e.to_string()))?;
    Ok(buf)
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::Cbor(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_payload_survives_frame_encoding() {
        let snapshot = StateSnapshot {
            variables: vec![
                WireVariable { name: "ball".into(), generation: 4, bytes: vec![1, 2, 3] },
                WireVariable { name: "paddle".into(), generation: 1, bytes: vec![9; 16] },
            ],
        };

        let frame = Payload::State(snapshot.clone()).into_frame(12, 0xabc).unwrap();
        assert_eq!(frame.opcode(), Some(Opcode::State));
        assert_eq!(frame.header.sequence(), 12);
        assert_eq!(frame.header.origin(), 0xabc);

        let wire = frame.to_bytes().unwrap();
        let decoded = Frame::decode(&wire).unwrap();
        assert_eq!(Payload::from_frame(&decoded).unwrap(), Payload::State(snapshot));
    }

    #[test]
    fn identical_snapshots_encode_identically() {
        let snapshot = StateSnapshot {
            variables: vec![WireVariable { name: "a".into(), generation: 1, bytes: vec![0; 8] }],
        };

        let a = Payload::State(snapshot.clone()).into_frame(1, 1).unwrap();
        let b = Payload::State(snapshot).into_frame(1, 1).unwrap();
        assert_eq!(a.to_bytes().unwrap(), b.to_bytes().unwrap());
    }

    #[test]
    fn value_bytes_encode_as_a_byte_string() {
        let name = "frame";
        let bytes = vec![0xFF; 4096];
        let snapshot = StateSnapshot {
            variables: vec![WireVariable { name: name.into(), generation: u64::MAX, bytes }],
        };

        let frame = Payload::State(snapshot).into_frame(1, 1).unwrap();
        let bound = SNAPSHOT_OVERHEAD + WireVariable::max_encoded_len(name.len(), 4096);
        // an array of integers would spend two bytes on every 0xFF
        assert!(frame.payload.len() <= bound, "{} > {bound}", frame.payload.len());
    }

    #[test]
    fn payload_mismatching_opcode_fails_to_decode() {
        let bye = Payload::Bye(Goodbye::new("done")).into_frame(0, 0).unwrap();
        let mut frame = bye.clone();
        frame.header = FrameHeader::new(Opcode::Hello);
        frame.reseal();

        assert!(matches!(Payload::from_frame(&frame), Err(ProtocolError::Cbor(_))));
    }
}
