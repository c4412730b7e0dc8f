//! Fixed-size frame header.
//!
//! ```text
//! 0       4   5   6       8               16              24      28      32
//! +-------+---+---+-------+---------------+---------------+-------+-------+
//! | magic |ver|op | flags |   sequence    |    origin     |  len  |  crc  |
//! +-------+---+---+-------+---------------+---------------+-------+-------+
//! ```
//!
//! All integers are big endian. `crc` is CRC-32 (IEEE) over bytes `0..28`
//! followed by the payload.

use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
    byteorder::big_endian::{U16, U32, U64},
};

use crate::{Opcode, PROTOCOL_VERSION, ProtocolError, Result};

/// Frame header, cast directly from network bytes.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct FrameHeader {
    magic: [u8; 4],
    version: u8,
    opcode: u8,
    flags: U16,
    sequence: U64,
    origin: U64,
    payload_size: U32,
    checksum: U32,
}

const _: () = assert!(std::mem::size_of::<FrameHeader>() == FrameHeader::SIZE);

impl FrameHeader {
    /// Encoded header size in bytes.
    pub const SIZE: usize = 32;

    /// Magic prefix of every frame.
    pub const MAGIC: [u8; 4] = *b"DGR1";

    /// Largest payload a peer may send.
    pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

    /// Number of leading header bytes covered by the checksum.
    pub const CHECKSUM_COVERAGE: usize = 28;

    /// Create a zeroed header for `opcode` at the current protocol version.
    pub fn new(opcode: Opcode) -> Self {
        Self {
            magic: Self::MAGIC,
            version: PROTOCOL_VERSION,
            opcode: opcode.to_u8(),
            flags: U16::new(0),
            sequence: U64::new(0),
            origin: U64::new(0),
            payload_size: U32::new(0),
            checksum: U32::new(0),
        }
    }

    /// Parse and validate a header from the first [`Self::SIZE`] bytes.
    ///
    /// Checks magic, version, opcode and the payload size limit. The checksum
    /// can only be verified once the payload is available, see
    /// [`crate::Frame::decode`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let head = bytes.get(..Self::SIZE).ok_or(ProtocolError::FrameTooShort {
            expected: Self::SIZE,
            actual: bytes.len(),
        })?;

        let header = Self::read_from_bytes(head).map_err(|_| ProtocolError::FrameTooShort {
            expected: Self::SIZE,
            actual: bytes.len(),
        })?;

        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        if self.magic != Self::MAGIC {
            return Err(ProtocolError::InvalidMagic(self.magic));
        }
        if self.version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(self.version));
        }
        if Opcode::from_u8(self.opcode).is_none() {
            return Err(ProtocolError::UnknownOpcode(self.opcode));
        }
        let size = self.payload_size() as usize;
        if size > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge { size, max: Self::MAX_PAYLOAD_SIZE });
        }
        Ok(())
    }

    /// Raw header bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(self.as_bytes());
        out
    }

    /// Protocol version byte.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Raw opcode byte.
    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    /// Opcode as an enum, `None` for unknown values.
    pub fn opcode_enum(&self) -> Option<Opcode> {
        Opcode::from_u8(self.opcode)
    }

    /// Frame sequence number. Only meaningful for `STATE` frames.
    pub fn sequence(&self) -> u64 {
        self.sequence.get()
    }

    /// Set the frame sequence number.
    pub fn set_sequence(&mut self, sequence: u64) {
        self.sequence.set(sequence);
    }

    /// Identity of the node that produced the frame.
    ///
    /// Masters stamp their session id on `STATE` frames; the relay stamps the
    /// originating slave id on forwarded `REPORT` frames.
    pub fn origin(&self) -> u64 {
        self.origin.get()
    }

    /// Set the origin id.
    pub fn set_origin(&mut self, origin: u64) {
        self.origin.set(origin);
    }

    /// Payload length in bytes.
    pub fn payload_size(&self) -> u32 {
        self.payload_size.get()
    }

    pub(crate) fn set_payload_size(&mut self, size: u32) {
        self.payload_size.set(size);
    }

    /// Checksum carried in the header.
    pub fn checksum(&self) -> u32 {
        self.checksum.get()
    }

    pub(crate) fn set_checksum(&mut self, checksum: u32) {
        self.checksum.set(checksum);
    }

    /// Bytes covered by the checksum, excluding the payload.
    pub(crate) fn checksummed_prefix(&self) -> &[u8] {
        &self.as_bytes()[..Self::CHECKSUM_COVERAGE]
    }
}

impl std::fmt::Debug for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHeader")
            .field("version", &self.version)
            .field("opcode", &self.opcode_enum())
            .field("sequence", &self.sequence())
            .field("origin", &self.origin())
            .field("payload_size", &self.payload_size())
            .field("checksum", &format!("{:#010x}", self.checksum()))
            .finish()
    }
}
