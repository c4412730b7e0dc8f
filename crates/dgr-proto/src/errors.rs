//! Protocol error types.

use crate::Opcode;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while encoding or decoding frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Buffer is shorter than the structure being decoded.
    #[error("frame too short: expected {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Header does not start with the protocol magic.
    #[error("invalid magic: {0:02x?}")]
    InvalidMagic([u8; 4]),

    /// Header carries a version this build does not speak.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Opcode byte is not a known frame type.
    #[error("unknown opcode: {0:#04x}")]
    UnknownOpcode(u8),

    /// Payload length exceeds [`crate::FrameHeader::MAX_PAYLOAD_SIZE`].
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Declared payload size.
        size: usize,
        /// Maximum permitted size.
        max: usize,
    },

    /// Checksum in the header does not match the received bytes.
    #[error("checksum mismatch: header says {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum carried in the header.
        expected: u32,
        /// Checksum computed over the received bytes.
        actual: u32,
    },

    /// Frame had a different type than the decoder expected.
    #[error("unexpected opcode: expected {expected:?}, got {actual:?}")]
    UnexpectedOpcode {
        /// Opcode the caller asked for.
        expected: Opcode,
        /// Opcode found in the header.
        actual: Opcode,
    },

    /// CBOR payload could not be encoded or decoded.
    #[error("cbor error: {0}")]
    Cbor(String),
}
